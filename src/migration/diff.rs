//! Line diffs in unified format for migration previews.
//!
//! Common leading and trailing lines are trimmed first; the remaining middle
//! is aligned with a longest-common-subsequence table when it is small enough
//! and otherwise shown as a plain replacement.

/// Middles with more cells than this are not aligned line by line.
const MAX_ALIGN_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// One edit with the positions in the old and new line lists it applies at.
#[derive(Debug, Clone, Copy)]
struct Edit {
    op: Op,
    old: usize,
    new: usize,
}

/// A rendered diff and how many lines it adds and removes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub text: String,
    pub added: u32,
    pub removed: u32,
}

impl UnifiedDiff {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    pub fn change_count(&self) -> u32 {
        self.added + self.removed
    }
}

/// Diff `old` against `new`, labelling the sides `from` and `to`
/// (`a/<path>`, `b/<path>` or `/dev/null`).
pub fn unified_diff(old: &str, new: &str, from: &str, to: &str, context: usize) -> UnifiedDiff {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();
    let edits = edit_script(&a, &b);

    let mut diff = UnifiedDiff::default();
    let hunks = hunk_ranges(&edits, context);
    if hunks.is_empty() {
        return diff;
    }

    diff.text.push_str(&format!("--- {}\n+++ {}\n", from, to));
    for (start, end) in hunks {
        let slice = &edits[start..end];
        let old_len = slice.iter().filter(|e| e.op != Op::Insert).count();
        let new_len = slice.iter().filter(|e| e.op != Op::Delete).count();
        diff.text.push_str(&format!(
            "@@ -{} +{} @@\n",
            range_label(slice[0].old, old_len),
            range_label(slice[0].new, new_len)
        ));
        for edit in slice {
            let (prefix, line) = match edit.op {
                Op::Equal => (' ', a[edit.old]),
                Op::Delete => {
                    diff.removed += 1;
                    ('-', a[edit.old])
                }
                Op::Insert => {
                    diff.added += 1;
                    ('+', b[edit.new])
                }
            };
            diff.text.push(prefix);
            diff.text.push_str(line);
            diff.text.push('\n');
        }
    }
    diff
}

fn range_label(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        n => format!("{},{}", start + 1, n),
    }
}

fn edit_script(a: &[&str], b: &[&str]) -> Vec<Edit> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut edits: Vec<Edit> = (0..prefix)
        .map(|i| Edit {
            op: Op::Equal,
            old: i,
            new: i,
        })
        .collect();

    let (a_mid, b_mid) = (&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix]);
    if (a_mid.len() + 1).saturating_mul(b_mid.len() + 1) <= MAX_ALIGN_CELLS {
        align(a_mid, b_mid, prefix, &mut edits);
    } else {
        replace(a_mid.len(), b_mid.len(), prefix, &mut edits);
    }

    for k in 0..suffix {
        edits.push(Edit {
            op: Op::Equal,
            old: a.len() - suffix + k,
            new: b.len() - suffix + k,
        });
    }
    edits
}

fn replace(a_len: usize, b_len: usize, offset: usize, edits: &mut Vec<Edit>) {
    for i in 0..a_len {
        edits.push(Edit {
            op: Op::Delete,
            old: offset + i,
            new: offset,
        });
    }
    for j in 0..b_len {
        edits.push(Edit {
            op: Op::Insert,
            old: offset + a_len,
            new: offset + j,
        });
    }
}

fn align(a: &[&str], b: &[&str], offset: usize, edits: &mut Vec<Edit>) {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        let (op, di, dj) = if i < n && j < m && a[i] == b[j] {
            (Op::Equal, 1, 1)
        } else if i < n && (j == m || lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]) {
            (Op::Delete, 1, 0)
        } else {
            (Op::Insert, 0, 1)
        };
        edits.push(Edit {
            op,
            old: offset + i,
            new: offset + j,
        });
        i += di;
        j += dj;
    }
}

/// Group changes into `[start, end)` ranges of the edit script, each padded
/// with up to `context` unchanged lines and merged when they touch.
fn hunk_ranges(edits: &[Edit], context: usize) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (idx, edit) in edits.iter().enumerate() {
        if edit.op == Op::Equal {
            continue;
        }
        let start = idx.saturating_sub(context);
        let end = (idx + 1 + context).min(edits.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

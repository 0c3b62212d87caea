//! Dry runs against a throwaway checkout.
//!
//! `analyze` fetches and analyzes a repository; `preview` additionally runs
//! every selected conversion and reports the edits as unified diffs. Neither
//! creates a job, publishes events or keeps anything on disk: the checkout
//! lives in its own workspace and is removed before the call returns.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::capabilities::{AnalysisOutcome, Capabilities, FileError, StageContext, TransformRequest};
use super::diff::unified_diff;
use super::ledger::{Ledger, LedgerCounts};
use super::machine::PipelinePolicy;
use super::models::{ApiEndpoint, BuildTool, DependencyChange, Issue, JobStatus, Platform};
use super::progress::{ProgressTracker, StageProgress};
use super::request::MigrationPlan;
use super::workspace::{Workspace, WorkspaceManager};
use crate::errors::{CapabilityError, JobFailure, PreviewError};

/// Diffs returned in full; later files are listed without one.
const MAX_DIFFS: usize = 10;
/// Lines kept from each returned diff.
const MAX_DIFF_LINES: usize = 50;
const DIFF_CONTEXT: usize = 3;
/// Files larger than this are left out of the before/after comparison.
const MAX_SNAPSHOT_BYTES: u64 = 2 * 1024 * 1024;

// ── Payloads ──────────────────────────────────────────────────────────

/// Owner and name parsed from a repository URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryLocation {
    pub owner: String,
    pub repo: String,
}

impl RepositoryLocation {
    /// Accepts `https://host/owner/repo(.git)`, `git@host:owner/repo.git`
    /// and plain `host/owner/repo`. Nested groups stay in `owner`.
    pub fn parse(url: &str) -> Result<Self, PreviewError> {
        let invalid = || PreviewError::InvalidRepositoryUrl(url.to_string());
        let trimmed = url.trim();
        let path = if let Some((_, rest)) = trimmed.split_once("://") {
            rest.split_once('/').map(|(_, path)| path).ok_or_else(invalid)?
        } else if let Some((host, rest)) = trimmed.split_once(':')
            && host.contains('@')
        {
            rest
        } else {
            trimmed.split_once('/').map(|(_, path)| path).ok_or_else(invalid)?
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.split_last() {
            Some((repo, owner)) if !owner.is_empty() => Ok(Self {
                owner: owner.join("/"),
                repo: repo.to_string(),
            }),
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryAnalysis {
    pub build_tool: BuildTool,
    pub detected_version: Option<String>,
    pub total_files: u32,
    pub java_files: u32,
    pub counts: LedgerCounts,
    pub issues: Vec<Issue>,
    pub dependencies: Vec<DependencyChange>,
    pub api_endpoints: Vec<ApiEndpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Modify,
    Create,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
    pub lines_added: u32,
    pub lines_removed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub file_path: String,
    pub diff: String,
    pub change_count: u32,
    /// The diff was cut at its line limit.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreviewSummary {
    pub files_to_modify: u32,
    pub files_to_create: u32,
    pub files_to_remove: u32,
    /// Added plus removed lines over every changed text file.
    pub total_changes: u32,
    pub issues_fixed: u32,
    pub issues_remaining: u32,
    pub dependencies_to_upgrade: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationPreview {
    pub repository: String,
    pub platform: Platform,
    pub source_version: String,
    pub target_version: String,
    pub conversions: Vec<String>,
    pub auto_fix: bool,
    pub summary: PreviewSummary,
    /// What each conversion reported doing, in order.
    pub changes: Vec<String>,
    pub files: Vec<FileChange>,
    pub file_diffs: Vec<FileDiff>,
    pub analysis: RepositoryAnalysis,
    /// Dependencies as they would be after the migration.
    pub dependencies: Vec<DependencyChange>,
}

// ── Service ───────────────────────────────────────────────────────────

/// Runs dry runs with the same capabilities as real jobs, at most
/// `max_concurrent` at a time.
pub struct PreviewService {
    caps: Capabilities,
    workspaces: WorkspaceManager,
    clone_timeout: Duration,
    stage_timeout: Duration,
    slots: Arc<Semaphore>,
}

/// A checked-out repository plus the context stages are given.
struct Checkout {
    workspace: Workspace,
    ctx: StageContext,
}

impl Checkout {
    async fn close(self) {
        self.ctx.cancel.cancel();
        let path = self.workspace.root().to_path_buf();
        if let Err(e) = self.workspace.destroy().await {
            warn!(path = %path.display(), error = %e, "failed to remove preview workspace");
        }
    }
}

impl PreviewService {
    pub fn new(
        caps: Capabilities,
        workspaces: WorkspaceManager,
        policy: &PipelinePolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            caps,
            workspaces,
            clone_timeout: policy.clone_timeout,
            stage_timeout: policy.stage_timeout,
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Fetch and analyze `plan`'s repository without migrating it.
    pub async fn analyze(&self, plan: MigrationPlan) -> Result<RepositoryAnalysis, PreviewError> {
        let _slot = self.acquire().await?;
        let checkout = self.open(plan)?;
        let result = self.analyze_in(&checkout.ctx).await;
        checkout.close().await;
        result
    }

    /// Run the whole migration against a throwaway checkout and report the
    /// edits it would make.
    pub async fn preview(&self, plan: MigrationPlan) -> Result<MigrationPreview, PreviewError> {
        let _slot = self.acquire().await?;
        let checkout = self.open(plan)?;
        let result = self.preview_in(&checkout.ctx).await;
        checkout.close().await;
        result
    }

    async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit, PreviewError> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|e| JobFailure::Internal(format!("preview slots closed: {}", e)).into())
    }

    fn open(&self, plan: MigrationPlan) -> Result<Checkout, PreviewError> {
        let id = Uuid::new_v4();
        let workspace = self
            .workspaces
            .allocate(id)
            .map_err(|e| JobFailure::Workspace(e.to_string()))?;
        let tracker = Arc::new(ProgressTracker::new(id, "Preview", None));
        let ctx = StageContext {
            job_id: id,
            plan: Arc::new(plan),
            workspace_root: workspace.root().to_path_buf(),
            source_dir: workspace.source_dir(),
            progress: StageProgress::new(tracker, 0, 100),
            cancel: CancellationToken::new(),
        };
        debug!(preview_id = %id, repo = %ctx.plan.source_repo_url, "preview workspace opened");
        Ok(Checkout { workspace, ctx })
    }

    async fn analyze_in(&self, ctx: &StageContext) -> Result<RepositoryAnalysis, PreviewError> {
        self.fetch(ctx).await?;
        let ledger = Ledger::new();
        let outcome = self.run_analysis(ctx, &ledger).await?;
        Ok(analysis_report(outcome, &ledger))
    }

    async fn preview_in(&self, ctx: &StageContext) -> Result<MigrationPreview, PreviewError> {
        self.fetch(ctx).await?;
        let ledger = Ledger::new();
        let outcome = self.run_analysis(ctx, &ledger).await?;
        let analysis = analysis_report(outcome, &ledger);

        let before = snapshot(ctx.source_dir.clone()).await?;
        let changes = self.run_conversions(ctx, &ledger).await?;
        let after = snapshot(ctx.source_dir.clone()).await?;
        let (files, file_diffs) = compare_snapshots(&before, &after);

        let counts = ledger.counts();
        let summary = PreviewSummary {
            files_to_modify: count_kind(&files, FileChangeKind::Modify),
            files_to_create: count_kind(&files, FileChangeKind::Create),
            files_to_remove: count_kind(&files, FileChangeKind::Remove),
            total_changes: files.iter().map(|f| f.lines_added + f.lines_removed).sum(),
            issues_fixed: counts.fixed,
            issues_remaining: counts.remaining(),
            dependencies_to_upgrade: counts.dependencies_upgraded,
        };
        info!(
            repo = %ctx.plan.source_repo_url,
            files = files.len(),
            total_changes = summary.total_changes,
            "preview complete"
        );

        let plan = &ctx.plan;
        Ok(MigrationPreview {
            repository: plan.source_repo_url.clone(),
            platform: plan.platform,
            source_version: plan.source_version.clone(),
            target_version: plan.target_version.clone(),
            conversions: plan.conversions.clone(),
            auto_fix: plan.options.auto_fix,
            summary,
            changes,
            files,
            file_diffs,
            analysis,
            dependencies: ledger.dependencies(),
        })
    }

    /// One fetch attempt bounded by the clone timeout.
    async fn fetch(&self, ctx: &StageContext) -> Result<(), PreviewError> {
        let result = bounded(
            JobStatus::Cloning,
            self.clone_timeout,
            self.caps.fetcher.fetch(ctx),
        )
        .await?;
        result.map_err(|e| JobFailure::from_capability(JobStatus::Cloning, e, 1))?;
        Ok(())
    }

    async fn run_analysis(
        &self,
        ctx: &StageContext,
        ledger: &Ledger,
    ) -> Result<AnalysisOutcome, PreviewError> {
        let result = bounded(
            JobStatus::Analyzing,
            self.stage_timeout,
            self.caps.analyzer.analyze(ctx),
        )
        .await?;
        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(CapabilityError::FileScoped {
                path,
                line,
                message,
            }) => {
                ledger.record_file_error(None, path.display().to_string(), line, message);
                AnalysisOutcome::default()
            }
            Err(e) => return Err(JobFailure::from_capability(JobStatus::Analyzing, e, 1).into()),
        };
        for issue in outcome.issues.drain(..) {
            ledger.record_issue(issue);
        }
        for dep in outcome.dependencies.drain(..) {
            ledger.record_dependency(dep);
        }
        record_file_errors(ledger, None, &outcome.file_errors);
        Ok(outcome)
    }

    /// Apply every conversion in plan order; returns the change descriptions.
    async fn run_conversions(
        &self,
        ctx: &StageContext,
        ledger: &Ledger,
    ) -> Result<Vec<String>, PreviewError> {
        let mut changes = Vec::new();
        for conversion in &ctx.plan.conversions {
            let request = TransformRequest {
                conversion: conversion.clone(),
                issues: ledger.open_issues_for(conversion),
                dependencies: ledger.dependencies(),
            };
            let result = bounded(
                JobStatus::Migrating,
                self.stage_timeout,
                self.caps.transformer.transform(ctx, &request),
            )
            .await?;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(CapabilityError::FileScoped {
                    path,
                    line,
                    message,
                }) => {
                    ledger.record_file_error(
                        Some(conversion.as_str()),
                        path.display().to_string(),
                        line,
                        message,
                    );
                    continue;
                }
                Err(e) => {
                    return Err(JobFailure::from_capability(JobStatus::Migrating, e, 1).into());
                }
            };

            for resolution in &outcome.resolutions {
                if let Err(e) = ledger.resolve_issue(
                    &resolution.issue_id,
                    resolution.status,
                    resolution.fix_description.clone(),
                ) {
                    debug!(error = %e, "ignoring issue resolution in preview");
                }
            }
            for upgrade in &outcome.upgrades {
                if let Err(e) = ledger.upgrade_dependency(&upgrade.dependency_id, &upgrade.new_version) {
                    debug!(error = %e, "ignoring dependency upgrade in preview");
                }
            }
            for dep in &outcome.failed_dependencies {
                if let Err(e) = ledger.fail_dependency(dep) {
                    debug!(error = %e, "ignoring dependency failure in preview");
                }
            }
            record_file_errors(ledger, Some(conversion.as_str()), &outcome.file_errors);
            changes.extend(outcome.changes);
        }
        Ok(changes)
    }
}

async fn bounded<T>(
    stage: JobStatus,
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<T, PreviewError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        JobFailure::Timeout {
            stage,
            limit_secs: limit.as_secs(),
        }
        .into()
    })
}

fn record_file_errors(ledger: &Ledger, conversion: Option<&str>, errors: &[FileError]) {
    for err in errors {
        ledger.record_file_error(conversion, err.path.clone(), err.line, err.message.clone());
    }
}

fn analysis_report(outcome: AnalysisOutcome, ledger: &Ledger) -> RepositoryAnalysis {
    RepositoryAnalysis {
        build_tool: outcome.build_tool,
        detected_version: outcome.detected_version,
        total_files: outcome.total_files,
        java_files: outcome.java_files,
        counts: ledger.counts(),
        issues: ledger.issues(),
        dependencies: ledger.dependencies(),
        api_endpoints: outcome.endpoints,
    }
}

fn count_kind(files: &[FileChange], kind: FileChangeKind) -> u32 {
    files.iter().filter(|f| f.kind == kind).count() as u32
}

// ── Tree comparison ───────────────────────────────────────────────────

type Snapshot = BTreeMap<String, Vec<u8>>;

/// Contents of every file under `root` keyed by `/`-separated relative path,
/// skipping `.git` and oversized files.
async fn snapshot(root: std::path::PathBuf) -> Result<Snapshot, PreviewError> {
    tokio::task::spawn_blocking(move || read_tree(&root))
        .await
        .map_err(|e| JobFailure::Internal(format!("snapshot task failed: {}", e)).into())
}

fn read_tree(root: &Path) -> Snapshot {
    let mut files = Snapshot::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_SNAPSHOT_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match std::fs::read(entry.path()) {
            Ok(bytes) => {
                files.insert(key, bytes);
            }
            Err(e) => debug!(path = %entry.path().display(), error = %e, "skipping unreadable file"),
        }
    }
    files
}

fn compare_snapshots(before: &Snapshot, after: &Snapshot) -> (Vec<FileChange>, Vec<FileDiff>) {
    let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut files = Vec::new();
    let mut diffs = Vec::new();

    for path in paths {
        let (kind, old, new) = match (before.get(path), after.get(path)) {
            (Some(old), Some(new)) if old != new => (FileChangeKind::Modify, old.as_slice(), new.as_slice()),
            (None, Some(new)) => (FileChangeKind::Create, &[][..], new.as_slice()),
            (Some(old), None) => (FileChangeKind::Remove, old.as_slice(), &[][..]),
            _ => continue,
        };
        let from = match kind {
            FileChangeKind::Create => "/dev/null".to_string(),
            _ => format!("a/{}", path),
        };
        let to = match kind {
            FileChangeKind::Remove => "/dev/null".to_string(),
            _ => format!("b/{}", path),
        };

        // Binary files are listed without line counts.
        let diff = match (std::str::from_utf8(old), std::str::from_utf8(new)) {
            (Ok(old), Ok(new)) => Some(unified_diff(old, new, &from, &to, DIFF_CONTEXT)),
            _ => None,
        };
        let (added, removed) = diff.as_ref().map(|d| (d.added, d.removed)).unwrap_or((0, 0));
        files.push(FileChange {
            path: path.clone(),
            kind,
            lines_added: added,
            lines_removed: removed,
        });

        if let Some(diff) = diff
            && !diff.is_empty()
            && diffs.len() < MAX_DIFFS
        {
            let total_lines = diff.text.lines().count();
            let text = if total_lines > MAX_DIFF_LINES {
                let mut kept: String = diff
                    .text
                    .lines()
                    .take(MAX_DIFF_LINES)
                    .collect::<Vec<_>>()
                    .join("\n");
                kept.push('\n');
                kept
            } else {
                diff.text.clone()
            };
            diffs.push(FileDiff {
                file_path: path.clone(),
                diff: text,
                change_count: diff.change_count(),
                truncated: total_lines > MAX_DIFF_LINES,
            });
        }
    }
    (files, diffs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::migration::artifacts::FileReporter;
    use crate::migration::capabilities::{
        Analyzer, FetchOutcome, Fetcher, IssueResolution, Notifier, QualityScanner,
        TransformOutcome, Transformer, Verifier, VerifyOutcome,
    };
    use crate::migration::models::{IssueSeverity, IssueStatus, JobSnapshot, NewIssue, QualityReport};
    use crate::migration::request::MigrationRequest;

    const BOXED: &str = "class App {\n    Integer x = new Integer(1);\n}\n";
    const UNBOXED: &str = "class App {\n    Integer x = Integer.valueOf(1);\n}\n";

    struct FakeFetcher {
        fail: Option<CapabilityError>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, ctx: &StageContext) -> Result<FetchOutcome, CapabilityError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            std::fs::create_dir_all(ctx.source_dir.join(".git")).unwrap();
            std::fs::write(ctx.source_dir.join(".git/HEAD"), "ref: main").unwrap();
            std::fs::write(ctx.source_dir.join("App.java"), BOXED).unwrap();
            std::fs::write(ctx.source_dir.join("Legacy.java"), "class Legacy {}\n").unwrap();
            Ok(FetchOutcome::default())
        }
    }

    struct BoxingAnalyzer;

    #[async_trait]
    impl Analyzer for BoxingAnalyzer {
        async fn analyze(&self, _ctx: &StageContext) -> Result<AnalysisOutcome, CapabilityError> {
            Ok(AnalysisOutcome {
                total_files: 2,
                java_files: 2,
                issues: vec![NewIssue {
                    line: Some(2),
                    conversion: Some("java_version".into()),
                    ..NewIssue::new(
                        IssueSeverity::Warning,
                        "deprecated_api",
                        "boxed constructor",
                        "App.java",
                    )
                }],
                ..AnalysisOutcome::default()
            })
        }
    }

    /// Rewrites the boxed constructor, removes `Legacy.java` and adds a
    /// module descriptor.
    struct Unboxer;

    #[async_trait]
    impl Transformer for Unboxer {
        async fn transform(
            &self,
            ctx: &StageContext,
            request: &TransformRequest,
        ) -> Result<TransformOutcome, CapabilityError> {
            std::fs::write(ctx.source_dir.join("App.java"), UNBOXED).unwrap();
            std::fs::remove_file(ctx.source_dir.join("Legacy.java")).unwrap();
            std::fs::write(ctx.source_dir.join("module-info.java"), "module app {}\n").unwrap();
            Ok(TransformOutcome {
                modified_files: vec!["App.java".into()],
                resolutions: request
                    .issues
                    .iter()
                    .map(|issue| IssueResolution {
                        issue_id: issue.id.clone(),
                        status: IssueStatus::Fixed,
                        fix_description: Some("Integer.valueOf".into()),
                    })
                    .collect(),
                changes: vec!["App.java: replaced new Integer(..)".into()],
                ..TransformOutcome::default()
            })
        }
    }

    struct Unused;

    #[async_trait]
    impl Verifier for Unused {
        async fn verify(
            &self,
            _ctx: &StageContext,
            _endpoints: &[ApiEndpoint],
        ) -> Result<VerifyOutcome, CapabilityError> {
            panic!("previews never verify");
        }
    }

    #[async_trait]
    impl QualityScanner for Unused {
        async fn scan(&self, _ctx: &StageContext) -> Result<QualityReport, CapabilityError> {
            panic!("previews never scan");
        }
    }

    #[async_trait]
    impl Notifier for Unused {
        async fn notify(&self, _address: &str, _snapshot: &JobSnapshot) -> Result<(), CapabilityError> {
            panic!("previews never notify");
        }
    }

    fn service(tmp: &TempDir, fail: Option<CapabilityError>) -> PreviewService {
        let caps = Capabilities {
            fetcher: Arc::new(FakeFetcher { fail }),
            analyzer: Arc::new(BoxingAnalyzer),
            transformer: Arc::new(Unboxer),
            verifier: Arc::new(Unused),
            quality: Arc::new(Unused),
            reporter: Arc::new(FileReporter::new(tmp.path().join("artifacts"))),
            notifier: Arc::new(Unused),
        };
        PreviewService::new(
            caps,
            WorkspaceManager::new(tmp.path().join("work")),
            &PipelinePolicy::default(),
            2,
        )
    }

    fn plan() -> MigrationPlan {
        MigrationRequest {
            source_repo_url: "https://github.com/acme/orders.git".into(),
            conversion_types: vec!["java_version".into()],
            ..MigrationRequest::default()
        }
        .validate()
        .unwrap()
    }

    fn workspace_is_empty(tmp: &TempDir) -> bool {
        std::fs::read_dir(tmp.path().join("work"))
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[test]
    fn test_parse_repository_urls() {
        let cases = [
            ("https://github.com/acme/orders.git", "acme", "orders"),
            ("https://github.com/acme/orders", "acme", "orders"),
            ("https://gitlab.com/group/sub/orders/", "group/sub", "orders"),
            ("git@github.com:acme/orders.git", "acme", "orders"),
            ("github.com/acme/orders", "acme", "orders"),
        ];
        for (url, owner, repo) in cases {
            let location = RepositoryLocation::parse(url).unwrap();
            assert_eq!(location.owner, owner, "{}", url);
            assert_eq!(location.repo, repo, "{}", url);
        }
    }

    #[test]
    fn test_parse_rejects_urls_without_owner() {
        for url in ["", "orders", "https://github.com/orders", "https://github.com"] {
            assert!(
                matches!(
                    RepositoryLocation::parse(url),
                    Err(PreviewError::InvalidRepositoryUrl(_))
                ),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_compare_snapshots_classifies_changes() {
        let before: Snapshot = [
            ("A.java".to_string(), BOXED.as_bytes().to_vec()),
            ("Same.java".to_string(), b"class Same {}\n".to_vec()),
            ("Gone.java".to_string(), b"class Gone {}\n".to_vec()),
        ]
        .into();
        let after: Snapshot = [
            ("A.java".to_string(), UNBOXED.as_bytes().to_vec()),
            ("Same.java".to_string(), b"class Same {}\n".to_vec()),
            ("New.java".to_string(), b"class New {}\n".to_vec()),
        ]
        .into();

        let (files, diffs) = compare_snapshots(&before, &after);
        let kinds: Vec<(&str, FileChangeKind)> =
            files.iter().map(|f| (f.path.as_str(), f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("A.java", FileChangeKind::Modify),
                ("Gone.java", FileChangeKind::Remove),
                ("New.java", FileChangeKind::Create),
            ]
        );
        assert_eq!(diffs.len(), 3);
        assert!(diffs[1].diff.starts_with("--- a/Gone.java\n+++ /dev/null\n"));
        assert!(diffs[2].diff.starts_with("--- /dev/null\n+++ b/New.java\n"));
    }

    #[test]
    fn test_long_diffs_are_truncated() {
        let old: String = (0..200).map(|n| format!("old {}\n", n)).collect();
        let new: String = (0..200).map(|n| format!("new {}\n", n)).collect();
        let before: Snapshot = [("Big.java".to_string(), old.into_bytes())].into();
        let after: Snapshot = [("Big.java".to_string(), new.into_bytes())].into();

        let (files, diffs) = compare_snapshots(&before, &after);
        assert_eq!((files[0].lines_added, files[0].lines_removed), (200, 200));
        assert!(diffs[0].truncated);
        assert_eq!(diffs[0].diff.lines().count(), MAX_DIFF_LINES);
        assert_eq!(diffs[0].change_count, 400);
    }

    #[tokio::test]
    async fn test_preview_reports_edits_and_removes_checkout() {
        let tmp = TempDir::new().unwrap();
        let preview = service(&tmp, None).preview(plan()).await.unwrap();

        assert_eq!(preview.repository, "https://github.com/acme/orders.git");
        assert_eq!(preview.conversions, vec!["java_version"]);
        assert_eq!(preview.summary.files_to_modify, 1);
        assert_eq!(preview.summary.files_to_create, 1);
        assert_eq!(preview.summary.files_to_remove, 1);
        assert_eq!(preview.summary.issues_fixed, 1);
        assert_eq!(preview.summary.issues_remaining, 0);
        assert_eq!(preview.changes, vec!["App.java: replaced new Integer(..)"]);
        assert!(preview.files.iter().all(|f| !f.path.starts_with(".git")));

        let app = preview
            .file_diffs
            .iter()
            .find(|d| d.file_path == "App.java")
            .unwrap();
        assert!(app.diff.contains("-    Integer x = new Integer(1);"));
        assert!(app.diff.contains("+    Integer x = Integer.valueOf(1);"));
        assert_eq!(app.change_count, 2);

        // The analysis section reflects the tree before any conversion ran.
        assert_eq!(preview.analysis.issues[0].status, IssueStatus::Detected);
        assert!(workspace_is_empty(&tmp));
    }

    #[tokio::test]
    async fn test_analyze_leaves_tree_untouched() {
        let tmp = TempDir::new().unwrap();
        let analysis = service(&tmp, None).analyze(plan()).await.unwrap();
        assert_eq!(analysis.java_files, 2);
        assert_eq!(analysis.counts.total_issues, 1);
        assert_eq!(analysis.issues[0].file_path, "App.java");
        assert!(workspace_is_empty(&tmp));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported_and_cleaned_up() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp, Some(CapabilityError::Auth("bad token".into())));
        let err = svc.preview(plan()).await.unwrap_err();
        assert!(matches!(
            err,
            PreviewError::Failed(JobFailure::Auth {
                stage: JobStatus::Cloning,
                ..
            })
        ));
        assert!(workspace_is_empty(&tmp));
    }
}

//! Runs the project's own test suite with Maven or Gradle.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use super::scanner::detect_build_tool;
use crate::errors::CapabilityError;
use crate::migration::capabilities::{StageContext, Verifier, VerifyOutcome};
use crate::migration::models::{ApiEndpoint, BuildTool};

const OUTPUT_TAIL_LINES: usize = 15;

static SUITE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<testsuite\b[^>]*>").expect("suite pattern is valid"));
static MAVEN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)")
        .expect("summary pattern is valid")
});
static GRADLE_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) tests? completed(?:, (\d+) failed)?(?:, (\d+) skipped)?")
        .expect("summary pattern is valid")
});

/// Totals from JUnit XML reports or console output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestSummary {
    pub fn executed(&self) -> u32 {
        self.tests.saturating_sub(self.skipped)
    }

    pub fn failed(&self) -> u32 {
        (self.failures + self.errors).min(self.executed())
    }

    fn add(&mut self, other: TestSummary) {
        self.tests += other.tests;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

fn attribute(tag: &str, name: &str) -> u32 {
    let needle = format!(" {}=\"", name);
    tag.find(&needle)
        .map(|at| &tag[at + needle.len()..])
        .and_then(|rest| rest.split('"').next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Sum the `<testsuite>` headers of one JUnit XML report.
pub fn parse_junit_report(xml: &str) -> TestSummary {
    let mut summary = TestSummary::default();
    for tag in SUITE_TAG.find_iter(xml) {
        let tag = tag.as_str();
        summary.add(TestSummary {
            tests: attribute(tag, "tests"),
            failures: attribute(tag, "failures"),
            errors: attribute(tag, "errors"),
            skipped: attribute(tag, "skipped"),
        });
    }
    summary
}

/// Fall back to the build tool's console summary. Maven prints a line per
/// class and then the aggregate, so the last match wins.
pub fn parse_console_summary(output: &str) -> Option<TestSummary> {
    if let Some(c) = MAVEN_SUMMARY.captures_iter(output).last() {
        let n = |i: usize| c[i].parse().unwrap_or(0);
        return Some(TestSummary {
            tests: n(1),
            failures: n(2),
            errors: n(3),
            skipped: n(4),
        });
    }
    GRADLE_SUMMARY.captures_iter(output).last().map(|c| {
        let n = |i: usize| c.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        TestSummary {
            tests: n(1),
            failures: n(2),
            errors: 0,
            skipped: n(3),
        }
    })
}

async fn read_reports(dir: &Path) -> TestSummary {
    let mut summary = TestSummary::default();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return summary;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with("TEST-") && name.ends_with(".xml")) {
            continue;
        }
        match tokio::fs::read_to_string(entry.path()).await {
            Ok(xml) => summary.add(parse_junit_report(&xml)),
            Err(e) => debug!(file = %name, error = %e, "unreadable test report"),
        }
    }
    summary
}

fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[derive(Debug, Clone)]
pub struct BuildToolVerifier {
    maven_cmd: String,
    gradle_cmd: String,
}

impl BuildToolVerifier {
    pub fn new(maven_cmd: impl Into<String>, gradle_cmd: impl Into<String>) -> Self {
        Self {
            maven_cmd: maven_cmd.into(),
            gradle_cmd: gradle_cmd.into(),
        }
    }

    fn command(&self, root: &Path, tool: BuildTool) -> Option<(Command, String, &'static str)> {
        match tool {
            BuildTool::Maven => {
                let mut cmd = Command::new(&self.maven_cmd);
                cmd.args(["-B", "test"]);
                Some((cmd, self.maven_cmd.clone(), "target/surefire-reports"))
            }
            BuildTool::Gradle => {
                let wrapper = root.join("gradlew");
                let (mut cmd, label) = if wrapper.is_file() {
                    (Command::new(wrapper), "./gradlew".to_string())
                } else {
                    (Command::new(&self.gradle_cmd), self.gradle_cmd.clone())
                };
                cmd.args(["test", "--console=plain"]);
                Some((cmd, label, "build/test-results/test"))
            }
            BuildTool::Unknown => None,
        }
    }
}

#[async_trait]
impl Verifier for BuildToolVerifier {
    async fn verify(
        &self,
        ctx: &StageContext,
        endpoints: &[ApiEndpoint],
    ) -> Result<VerifyOutcome, CapabilityError> {
        let root = &ctx.source_dir;
        let Some((mut cmd, label, reports)) = self.command(root, detect_build_tool(root)) else {
            ctx.progress.log("No Maven or Gradle build found; tests skipped");
            return Ok(VerifyOutcome::default());
        };

        ctx.progress.report(5, format!("Running {} test", label));
        let output = cmd
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;
        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ctx.progress
                    .log(format!("{} is not installed; tests skipped", label));
                return Ok(VerifyOutcome::default());
            }
            Err(e) => {
                return Err(CapabilityError::Permanent(format!(
                    "failed to run {}: {}",
                    label, e
                )));
            }
        };
        ctx.progress.report(90, "Collecting test results");

        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let mut summary = read_reports(&root.join(reports)).await;
        if summary.tests == 0 {
            summary = parse_console_summary(&text).unwrap_or_default();
        }

        if !output.status.success() && summary.executed() == 0 {
            return Err(CapabilityError::Permanent(format!(
                "build failed before any test ran:\n{}",
                tail(&text, OUTPUT_TAIL_LINES)
            )));
        }

        let build_ok = output.status.success();
        let endpoints_validated = endpoints.len() as u32;
        ctx.progress.report(100, "Tests finished");
        Ok(VerifyOutcome {
            tests_run: summary.executed(),
            tests_passed: summary.executed() - summary.failed(),
            tests_failed: summary.failed(),
            endpoints_validated,
            endpoints_working: if build_ok { endpoints_validated } else { 0 },
        })
    }
}

//! Artifact generation: the data handed to the reporter and the default
//! file-backed reporter that renders it.
//!
//! [`FileReporter`] writes into `<artifacts_root>/<job_id>/` so artifacts
//! outlive the job workspace:
//!
//! | File                 | Content                                        |
//! |----------------------|------------------------------------------------|
//! | `report.html`        | human-readable migration report                |
//! | `report.json`        | the same data, structured                      |
//! | `load-test.jmx`      | JMeter plan with one sampler per API endpoint  |
//! | `project.zip`        | the transformed checkout, `.git` excluded      |

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use super::capabilities::Reporter;
use super::models::{ApiEndpoint, DependencyChange, Issue, JobSnapshot, LogEntry};
use crate::errors::CapabilityError;

/// How many trailing log lines the HTML report shows.
const REPORT_LOG_LINES: usize = 50;

/// Everything the reporter receives for a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct ReportInput {
    pub snapshot: JobSnapshot,
    pub issues: Vec<Issue>,
    pub dependencies: Vec<DependencyChange>,
    pub logs: Vec<LogEntry>,
    /// The transformed checkout.
    pub workspace: PathBuf,
    pub endpoints: Vec<ApiEndpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Report,
    ReportJson,
    LoadTestPlan,
    Archive,
}

impl ArtifactKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Report => "text/html; charset=utf-8",
            Self::ReportJson => "application/json",
            Self::LoadTestPlan => "application/xml",
            Self::Archive => "application/zip",
        }
    }

    /// Attachment name offered to clients.
    pub fn download_name(&self, job_id: Uuid) -> String {
        match self {
            Self::Report => format!("migration-report-{}.html", job_id),
            Self::ReportJson => format!("migration-report-{}.json", job_id),
            Self::LoadTestPlan => format!("migration-test-{}.jmx", job_id),
            Self::Archive => format!("migrated-project-{}.zip", job_id),
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            Self::Report => "report.html",
            Self::ReportJson => "report.json",
            Self::LoadTestPlan => "load-test.jmx",
            Self::Archive => "project.zip",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" | "report" => Ok(Self::Report),
            "json" => Ok(Self::ReportJson),
            "jmeter" | "jmx" => Ok(Self::LoadTestPlan),
            "zip" | "archive" => Ok(Self::Archive),
            _ => Err(format!("Invalid artifact kind: {}", s)),
        }
    }
}

/// Paths of a job's generated artifacts.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactSet {
    pub dir: PathBuf,
    pub report_html: PathBuf,
    pub report_json: PathBuf,
    pub load_test_plan: PathBuf,
    pub archive: PathBuf,
}

impl ArtifactSet {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            report_html: dir.join(ArtifactKind::Report.file_name()),
            report_json: dir.join(ArtifactKind::ReportJson.file_name()),
            load_test_plan: dir.join(ArtifactKind::LoadTestPlan.file_name()),
            archive: dir.join(ArtifactKind::Archive.file_name()),
            dir,
        }
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Report => &self.report_html,
            ArtifactKind::ReportJson => &self.report_json,
            ArtifactKind::LoadTestPlan => &self.load_test_plan,
            ArtifactKind::Archive => &self.archive,
        }
    }
}

// ── File reporter ─────────────────────────────────────────────────────

pub struct FileReporter {
    root: PathBuf,
}

impl FileReporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn generate(&self, input: &ReportInput) -> Result<ArtifactSet, CapabilityError> {
        let set = ArtifactSet::in_dir(self.job_dir(input.snapshot.id));
        let input = input.clone();
        let target = set.clone();
        let result = tokio::task::spawn_blocking(move || write_artifacts(&input, &target))
            .await
            .map_err(|e| CapabilityError::Permanent(format!("artifact task failed: {}", e)))?;

        match result {
            Ok(()) => {
                debug!(dir = %set.dir.display(), "artifacts written");
                Ok(set)
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&set.dir).await;
                Err(CapabilityError::Permanent(e.to_string()))
            }
        }
    }

    async fn discard(&self, job_id: Uuid) {
        let dir = self.job_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(dir = %dir.display(), error = %e, "failed to discard artifacts");
        }
    }
}

fn write_artifacts(input: &ReportInput, set: &ArtifactSet) -> io::Result<()> {
    std::fs::create_dir_all(&set.dir)?;
    std::fs::write(&set.report_html, render_html_report(input))?;
    let json = serde_json::to_vec_pretty(input).map_err(io::Error::other)?;
    std::fs::write(&set.report_json, json)?;
    std::fs::write(&set.load_test_plan, render_load_test_plan(&input.snapshot, &input.endpoints))?;
    archive_directory(&input.workspace, &set.archive)?;
    Ok(())
}

/// Zip `source` into `dest`, skipping `.git`. A missing source yields an
/// empty archive.
pub fn archive_directory(source: &Path, dest: &Path) -> io::Result<()> {
    let file = File::create(dest)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    if source.is_dir() {
        let walker = WalkDir::new(source)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(io::Error::other)?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .map_err(io::Error::other)?
                .to_string_lossy()
                .replace('\\', "/");
            if entry.file_type().is_dir() {
                zip.add_directory(rel, options).map_err(io::Error::other)?;
            } else if entry.file_type().is_file() {
                zip.start_file(rel, options).map_err(io::Error::other)?;
                let mut f = File::open(entry.path())?;
                io::copy(&mut f, &mut zip)?;
            }
        }
    }

    let mut file = zip.finish().map_err(io::Error::other)?;
    file.flush()
}

// ── Rendering ─────────────────────────────────────────────────────────

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_html_report(input: &ReportInput) -> String {
    let job = &input.snapshot;
    let c = &job.counts;
    let mut html = String::new();

    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Migration Report - {repo}</title>
<style>
body {{ font-family: -apple-system, Segoe UI, sans-serif; margin: 2rem; color: #1f2937; }}
h1 {{ margin-bottom: 0.25rem; }}
.metrics {{ display: flex; flex-wrap: wrap; gap: 1rem; margin: 1.5rem 0; }}
.metric {{ border: 1px solid #e5e7eb; border-radius: 8px; padding: 0.75rem 1rem; min-width: 8rem; }}
.metric .value {{ font-size: 1.5rem; font-weight: 600; }}
table {{ border-collapse: collapse; width: 100%; margin-bottom: 1.5rem; }}
th, td {{ border: 1px solid #e5e7eb; padding: 0.4rem 0.6rem; text-align: left; font-size: 0.9rem; }}
.logs {{ background: #111827; color: #d1d5db; padding: 1rem; font-family: monospace; white-space: pre-wrap; }}
</style>
</head>
<body>
<h1>Migration Report</h1>
<p><strong>{repo}</strong> &rarr; <strong>{target}</strong></p>
<p>Java {source_version} &rarr; Java {target_version} &middot; job {id} &middot; generated {generated}</p>
"#,
        repo = escape_html(&job.source_repo_url),
        target = escape_html(&job.target_repo_name),
        source_version = escape_html(&job.source_version),
        target_version = escape_html(&job.target_version),
        id = job.id,
        generated = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    );

    html.push_str("<div class=\"metrics\">\n");
    let metrics = [
        ("Files modified", c.files_modified),
        ("Issues fixed", c.issues_fixed),
        ("Issues remaining", c.issues_remaining),
        ("Errors", c.errors),
        ("Warnings", c.warnings),
        ("Dependencies upgraded", c.dependencies_upgraded),
        ("Tests run", c.tests_run),
        ("Tests failed", c.tests_failed),
    ];
    for (label, value) in metrics {
        let _ = writeln!(
            html,
            "<div class=\"metric\"><div class=\"value\">{}</div><div>{}</div></div>",
            value, label
        );
    }
    html.push_str("</div>\n");

    html.push_str("<h2>Conversions</h2>\n<ul>\n");
    for conversion in &job.conversion_types {
        let _ = writeln!(html, "<li>{}</li>", escape_html(conversion));
    }
    html.push_str("</ul>\n");

    if let Some(quality) = &job.quality {
        let _ = writeln!(
            html,
            "<h2>Code Quality</h2>\n<p>Quality gate: <strong>{}</strong> &middot; bugs {} &middot; vulnerabilities {} &middot; code smells {} &middot; coverage {:.1}%</p>",
            escape_html(&quality.quality_gate),
            quality.bugs,
            quality.vulnerabilities,
            quality.code_smells,
            quality.coverage
        );
    }

    html.push_str("<h2>Issues</h2>\n");
    if input.issues.is_empty() {
        html.push_str("<p>No issues detected.</p>\n");
    } else {
        html.push_str("<table>\n<tr><th>ID</th><th>Severity</th><th>Status</th><th>Category</th><th>File</th><th>Message</th></tr>\n");
        for issue in &input.issues {
            let location = match issue.line {
                Some(line) => format!("{}:{}", issue.file_path, line),
                None => issue.file_path.clone(),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&issue.id),
                issue.severity.as_str(),
                issue.status.as_str(),
                escape_html(&issue.category),
                escape_html(&location),
                escape_html(&issue.message)
            );
        }
        html.push_str("</table>\n");
    }

    if !input.dependencies.is_empty() {
        html.push_str("<h2>Dependencies</h2>\n<table>\n<tr><th>Dependency</th><th>Current</th><th>New</th><th>Status</th></tr>\n");
        for dep in &input.dependencies {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&dep.id),
                escape_html(&dep.current_version),
                escape_html(dep.new_version.as_deref().unwrap_or("-")),
                dep.status.as_str()
            );
        }
        html.push_str("</table>\n");
    }

    if !input.endpoints.is_empty() {
        html.push_str("<h2>API Endpoints</h2>\n<ul>\n");
        for ep in &input.endpoints {
            let _ = writeln!(
                html,
                "<li><code>{} {}</code> ({})</li>",
                escape_html(&ep.method),
                escape_html(&ep.path),
                escape_html(&ep.file)
            );
        }
        html.push_str("</ul>\n");
    }

    html.push_str("<h2>Migration Log</h2>\n<div class=\"logs\">");
    let start = input.logs.len().saturating_sub(REPORT_LOG_LINES);
    for entry in &input.logs[start..] {
        html.push_str(&escape_html(&entry.display_line()));
        html.push('\n');
    }
    html.push_str("</div>\n</body>\n</html>\n");
    html
}

/// JMeter test plan skeleton. Falls back to a single health-check sampler
/// when no endpoints were discovered.
pub fn render_load_test_plan(job: &JobSnapshot, endpoints: &[ApiEndpoint]) -> String {
    let fallback = [ApiEndpoint {
        method: "GET".to_string(),
        path: "/actuator/health".to_string(),
        file: String::new(),
    }];
    let endpoints = if endpoints.is_empty() { &fallback[..] } else { endpoints };

    let mut xml = String::new();
    let _ = write!(
        xml,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<jmeterTestPlan version="1.2" properties="5.0" jmeter="5.6.3">
  <hashTree>
    <TestPlan guiclass="TestPlanGui" testclass="TestPlan" testname="Migration Load Test - {name}" enabled="true">
      <stringProp name="TestPlan.comments">Generated for migration job {id} (Java {source} to {target})</stringProp>
      <boolProp name="TestPlan.functional_mode">false</boolProp>
      <boolProp name="TestPlan.serialize_threadgroups">false</boolProp>
      <elementProp name="TestPlan.user_defined_variables" elementType="Arguments" guiclass="ArgumentsPanel" testclass="Arguments" testname="User Defined Variables" enabled="true">
        <collectionProp name="Arguments.arguments">
{vars}        </collectionProp>
      </elementProp>
    </TestPlan>
    <hashTree>
      <ThreadGroup guiclass="ThreadGroupGui" testclass="ThreadGroup" testname="API Test Thread Group" enabled="true">
        <stringProp name="ThreadGroup.on_sample_error">continue</stringProp>
        <elementProp name="ThreadGroup.main_controller" elementType="LoopController" guiclass="LoopControlGui" testclass="LoopController" testname="Loop Controller" enabled="true">
          <boolProp name="LoopController.continue_forever">false</boolProp>
          <stringProp name="LoopController.loops">${{LOOP_COUNT}}</stringProp>
        </elementProp>
        <stringProp name="ThreadGroup.num_threads">${{THREAD_COUNT}}</stringProp>
        <stringProp name="ThreadGroup.ramp_time">${{RAMP_UP_TIME}}</stringProp>
        <boolProp name="ThreadGroup.scheduler">false</boolProp>
      </ThreadGroup>
      <hashTree>
        <HeaderManager guiclass="HeaderPanel" testclass="HeaderManager" testname="HTTP Header Manager" enabled="true">
          <collectionProp name="HeaderManager.headers">
            <elementProp name="" elementType="Header">
              <stringProp name="Header.name">Content-Type</stringProp>
              <stringProp name="Header.value">application/json</stringProp>
            </elementProp>
            <elementProp name="" elementType="Header">
              <stringProp name="Header.name">Accept</stringProp>
              <stringProp name="Header.value">application/json</stringProp>
            </elementProp>
          </collectionProp>
        </HeaderManager>
        <hashTree/>
"#,
        name = escape_html(&job.target_repo_name),
        id = job.id,
        source = escape_html(&job.source_version),
        target = escape_html(&job.target_version),
        vars = render_variables(&[
            ("BASE_URL", "http://localhost:8080"),
            ("THREAD_COUNT", "10"),
            ("RAMP_UP_TIME", "30"),
            ("LOOP_COUNT", "5"),
        ]),
    );

    for ep in endpoints {
        // Spring's @RequestMapping has no fixed verb; exercise it with GET.
        let method = match ep.method.as_str() {
            "REQUEST" => "GET",
            other => other,
        };
        let _ = write!(
            xml,
            r#"        <HTTPSamplerProxy guiclass="HttpTestSampleGui" testclass="HTTPSamplerProxy" testname="{method} {path}" enabled="true">
          <stringProp name="HTTPSampler.domain">${{__P(BASE_URL,localhost)}}</stringProp>
          <stringProp name="HTTPSampler.port">8080</stringProp>
          <stringProp name="HTTPSampler.protocol">http</stringProp>
          <stringProp name="HTTPSampler.path">{path}</stringProp>
          <stringProp name="HTTPSampler.method">{method}</stringProp>
          <boolProp name="HTTPSampler.follow_redirects">true</boolProp>
          <boolProp name="HTTPSampler.use_keepalive">true</boolProp>
        </HTTPSamplerProxy>
        <hashTree>
          <ResponseAssertion guiclass="AssertionGui" testclass="ResponseAssertion" testname="Status 2xx" enabled="true">
            <collectionProp name="Asserion.test_strings">
              <stringProp name="49586">2\d\d</stringProp>
            </collectionProp>
            <stringProp name="Assertion.test_field">Assertion.response_code</stringProp>
            <intProp name="Assertion.test_type">1</intProp>
          </ResponseAssertion>
          <hashTree/>
        </hashTree>
"#,
            method = escape_html(method),
            path = escape_html(&ep.path),
        );
    }

    xml.push_str(
        r#"        <ResultCollector guiclass="SummaryReport" testclass="ResultCollector" testname="Summary Report" enabled="true">
          <boolProp name="ResultCollector.error_logging">false</boolProp>
          <stringProp name="filename"></stringProp>
        </ResultCollector>
        <hashTree/>
      </hashTree>
    </hashTree>
  </hashTree>
</jmeterTestPlan>
"#,
    );
    xml
}

fn render_variables(vars: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (name, value) in vars {
        let _ = write!(
            out,
            r#"          <elementProp name="{name}" elementType="Argument">
            <stringProp name="Argument.name">{name}</stringProp>
            <stringProp name="Argument.value">{value}</stringProp>
            <stringProp name="Argument.metadata">=</stringProp>
          </elementProp>
"#
        );
    }
    out
}

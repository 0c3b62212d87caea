use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FailureKind;

// ── Job lifecycle ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Cloning,
    Analyzing,
    Migrating,
    Testing,
    Reporting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cloning => "cloning",
            Self::Analyzing => "analyzing",
            Self::Migrating => "migrating",
            Self::Testing => "testing",
            Self::Reporting => "reporting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Overall progress a job has reached once this stage succeeds.
    pub fn completion_floor(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Cloning => 20,
            Self::Analyzing => 40,
            Self::Migrating => 70,
            Self::Testing => 90,
            Self::Reporting | Self::Completed => 100,
            Self::Failed | Self::Cancelled => 0,
        }
    }

    /// Human description shown as the current step when a stage begins.
    pub fn step_description(&self) -> &'static str {
        match self {
            Self::Pending => "Waiting for a free execution slot",
            Self::Cloning => "Cloning source repository",
            Self::Analyzing => "Analyzing project structure and dependencies",
            Self::Migrating => "Applying conversions",
            Self::Testing => "Running tests",
            Self::Reporting => "Generating reports and artifacts",
            Self::Completed => "Migration completed",
            Self::Failed => "Migration failed",
            Self::Cancelled => "Migration cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "cloning" => Ok(Self::Cloning),
            "analyzing" => Ok(Self::Analyzing),
            "migrating" => Ok(Self::Migrating),
            "testing" => Ok(Self::Testing),
            "reporting" => Ok(Self::Reporting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Validate that a job status transition is legal.
///
/// Stages advance strictly in order (testing may be skipped); `failed` and
/// `cancelled` are reachable from every non-terminal state.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Pending, Cloning)
            | (Cloning, Analyzing)
            | (Analyzing, Migrating)
            | (Migrating, Testing)
            | (Migrating, Reporting)
            | (Testing, Reporting)
            | (Reporting, Completed)
            | (_, Failed)
            | (_, Cancelled)
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Github,
    Gitlab,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            _ => Err(format!("Invalid platform: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOptions {
    pub run_tests: bool,
    pub run_quality_scan: bool,
    pub auto_fix: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub total_files: u32,
    pub java_files: u32,
    pub files_modified: u32,
    pub issues_fixed: u32,
    pub issues_remaining: u32,
    pub errors: u32,
    pub warnings: u32,
    pub dependencies_upgraded: u32,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub api_endpoints_validated: u32,
    pub api_endpoints_working: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub quality_gate: String,
    pub bugs: u32,
    pub vulnerabilities: u32,
    pub code_smells: u32,
    pub coverage: f64,
    pub duplications: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildTool {
    Maven,
    Gradle,
    Unknown,
}

impl BuildTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maven => "maven",
            Self::Gradle => "gradle",
            Self::Unknown => "unknown",
        }
    }
}

/// Immutable view of a job at one instant. Never carries the access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub source_repo_url: String,
    pub target_repo_name: String,
    pub platform: Platform,
    pub source_version: String,
    pub target_version: String,
    pub conversion_types: Vec<String>,
    pub options: JobOptions,
    pub progress: u8,
    pub current_step: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: JobCounts,
    pub build_tool: Option<BuildTool>,
    pub detected_version: Option<String>,
    pub quality: Option<QualityReport>,
    pub published_repo_url: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
    /// Last log lines captured when the job failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_context: Vec<String>,
    pub artifacts_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// `[HH:MM:SS] message`, the form used in reports and failure context.
    pub fn display_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

// ── Ledger records ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Detected,
    Fixed,
    ManualReview,
    Ignored,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Fixed => "fixed",
            Self::ManualReview => "manual_review",
            Self::Ignored => "ignored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Detected)
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(Self::Detected),
            "fixed" => Ok(Self::Fixed),
            "manual_review" => Ok(Self::ManualReview),
            "ignored" => Ok(Self::Ignored),
            _ => Err(format!("Invalid issue status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub severity: IssueSeverity,
    pub status: IssueStatus,
    pub category: String,
    pub message: String,
    pub file_path: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub snippet: Option<String>,
    pub suggested_fix: Option<String>,
    pub fix_description: Option<String>,
    pub fixed_at: Option<DateTime<Utc>>,
    /// Conversion that owns the issue; `None` for problems found before any
    /// conversion ran.
    pub conversion: Option<String>,
    /// Detection rule that produced the issue, when it came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// An issue as reported by a capability, before the ledger assigns identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub severity: IssueSeverity,
    pub category: String,
    pub message: String,
    pub file_path: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub snippet: Option<String>,
    pub suggested_fix: Option<String>,
    pub conversion: Option<String>,
    pub rule_id: Option<String>,
}

impl NewIssue {
    pub fn new(
        severity: IssueSeverity,
        category: impl Into<String>,
        message: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            file_path: file_path.into(),
            line: None,
            column: None,
            snippet: None,
            suggested_fix: None,
            conversion: None,
            rule_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    Unchanged,
    Analyzing,
    Upgraded,
    Failed,
}

impl DependencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Analyzing => "analyzing",
            Self::Upgraded => "upgraded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyChange {
    /// `group_id:artifact_id`
    pub id: String,
    pub group_id: String,
    pub artifact_id: String,
    pub current_version: String,
    pub new_version: Option<String>,
    pub status: DependencyStatus,
}

/// A dependency as discovered by analysis. `proposed_version` is the
/// upgrade the analyzer recommends, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDependency {
    pub group_id: String,
    pub artifact_id: String,
    pub current_version: String,
    pub proposed_version: Option<String>,
}

/// A REST endpoint discovered in the source tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    pub file: String,
}

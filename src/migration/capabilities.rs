//! Stage capability interfaces.
//!
//! The state machine drives a job by calling these traits; everything that
//! touches the network, spawns a build tool or rewrites source files lives
//! behind them. Default implementations are in [`super::adapters`]; tests
//! substitute scripted fakes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::artifacts::{ArtifactSet, ReportInput};
use super::models::{
    ApiEndpoint, BuildTool, DependencyChange, Issue, IssueStatus, JobSnapshot, NewDependency,
    NewIssue, QualityReport,
};
use super::progress::StageProgress;
use super::request::MigrationPlan;
use crate::errors::CapabilityError;

/// Everything a capability may look at for one stage call.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub plan: Arc<MigrationPlan>,
    pub workspace_root: PathBuf,
    /// Checkout location inside the workspace.
    pub source_dir: PathBuf,
    pub progress: StageProgress,
    /// Cancelled when the job is cancelled. Capabilities that can stop early
    /// should watch it; the state machine also drops in-flight calls.
    pub cancel: CancellationToken,
}

// ── Outcomes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub revision: Option<String>,
}

/// A problem scoped to one file that a capability recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path: String,
    pub line: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub build_tool: BuildTool,
    pub detected_version: Option<String>,
    pub total_files: u32,
    pub java_files: u32,
    pub issues: Vec<NewIssue>,
    pub dependencies: Vec<NewDependency>,
    pub endpoints: Vec<ApiEndpoint>,
    pub file_errors: Vec<FileError>,
}

impl Default for AnalysisOutcome {
    fn default() -> Self {
        Self {
            build_tool: BuildTool::Unknown,
            detected_version: None,
            total_files: 0,
            java_files: 0,
            issues: Vec::new(),
            dependencies: Vec::new(),
            endpoints: Vec::new(),
            file_errors: Vec::new(),
        }
    }
}

/// Input for one conversion.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub conversion: String,
    /// Issues owned by this conversion that are still `detected`.
    pub issues: Vec<Issue>,
    pub dependencies: Vec<DependencyChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueResolution {
    pub issue_id: String,
    pub status: IssueStatus,
    pub fix_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyUpgrade {
    pub dependency_id: String,
    pub new_version: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    /// Paths relative to the checkout.
    pub modified_files: Vec<String>,
    pub resolutions: Vec<IssueResolution>,
    pub upgrades: Vec<DependencyUpgrade>,
    pub failed_dependencies: Vec<String>,
    pub file_errors: Vec<FileError>,
    /// Human-readable summary lines for the job log.
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub tests_run: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub endpoints_validated: u32,
    pub endpoints_working: u32,
}

// ── Capability traits ─────────────────────────────────────────────────

/// Source control: brings the repository into the workspace and optionally
/// publishes the transformed tree.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, ctx: &StageContext) -> Result<FetchOutcome, CapabilityError>;

    /// Push the transformed checkout somewhere. Returns the published URL,
    /// or `None` when publishing is not configured.
    async fn publish(&self, _ctx: &StageContext) -> Result<Option<String>, CapabilityError> {
        Ok(None)
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, ctx: &StageContext) -> Result<AnalysisOutcome, CapabilityError>;
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        ctx: &StageContext,
        request: &TransformRequest,
    ) -> Result<TransformOutcome, CapabilityError>;
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        ctx: &StageContext,
        endpoints: &[ApiEndpoint],
    ) -> Result<VerifyOutcome, CapabilityError>;
}

/// Static analysis service. Advisory: its failure never fails a job.
#[async_trait]
pub trait QualityScanner: Send + Sync {
    async fn scan(&self, ctx: &StageContext) -> Result<QualityReport, CapabilityError>;
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn generate(&self, input: &ReportInput) -> Result<ArtifactSet, CapabilityError>;

    /// Drop anything written for a job whose reporting was interrupted.
    async fn discard(&self, _job_id: Uuid) {}
}

/// Delivers the end-of-job summary. Runs after the job is terminal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, address: &str, snapshot: &JobSnapshot) -> Result<(), CapabilityError>;
}

/// The set of capabilities a registry hands to every job it runs.
#[derive(Clone)]
pub struct Capabilities {
    pub fetcher: Arc<dyn Fetcher>,
    pub analyzer: Arc<dyn Analyzer>,
    pub transformer: Arc<dyn Transformer>,
    pub verifier: Arc<dyn Verifier>,
    pub quality: Arc<dyn QualityScanner>,
    pub reporter: Arc<dyn Reporter>,
    pub notifier: Arc<dyn Notifier>,
}

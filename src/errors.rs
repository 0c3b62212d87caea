//! Typed error hierarchy for the migrator.
//!
//! One enum per concern:
//! - `ValidationError` - a start request was malformed; no job is created
//! - `CapabilityError` - what a stage capability (fetcher, analyzer, ...) reports
//! - `JobFailure` - why a job ended in `failed`; always carries a message
//! - `LedgerError` - illegal issue or dependency bookkeeping
//! - `WorkspaceError` - per-job filesystem area could not be managed
//! - `RegistryError` - registry queries and admission
//! - `PreviewError` - a dry run (analysis or preview) produced no result

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::migration::models::{IssueStatus, JobStatus};

/// A start request that cannot become a job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} '{value}' is not a valid version (expected digits separated by dots)")]
    InvalidVersion { field: &'static str, value: String },

    #[error("target version {target} must be greater than source version {source_version}")]
    VersionNotIncreasing {
        source_version: String,
        target: String,
    },

    #[error("unsupported platform '{0}' (expected github or gitlab)")]
    UnknownPlatform(String),

    #[error("at least one conversion type must be selected")]
    NoConversions,

    #[error("unknown conversion type '{0}'")]
    UnknownConversion(String),

    #[error("conversion type '{0}' selected more than once")]
    DuplicateConversion(String),

    #[error("conversion types '{first}' and '{second}' cannot be combined")]
    ConflictingConversions { first: String, second: String },

    #[error("quality scan requires run_tests to be enabled")]
    QualityScanRequiresTests,

    #[error("'{0}' is not a valid notification address")]
    InvalidEmail(String),
}

/// Errors a stage capability may report back to the state machine.
///
/// The variant decides the policy: auth and permanent errors fail the job
/// immediately, transient errors are retried where the stage allows it, and
/// file-scoped errors are absorbed into the ledger as manual-review issues.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("{}: {message}", display_location(.path, .line))]
    FileScoped {
        path: PathBuf,
        line: Option<u32>,
        message: String,
    },
}

fn display_location(path: &std::path::Path, line: &Option<u32>) -> String {
    match line {
        Some(line) => format!("{}:{}", path.display(), line),
        None => path.display().to_string(),
    }
}

impl CapabilityError {
    pub fn file_scoped(path: impl Into<PathBuf>, line: Option<u32>, message: impl Into<String>) -> Self {
        Self::FileScoped {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Coarse classification of a job failure, exposed on snapshots so clients
/// can tell a timeout from a rejected credential without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Transient,
    Permanent,
    Timeout,
    Workspace,
    ArtifactGeneration,
    TestFailures,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Workspace => "workspace",
            Self::ArtifactGeneration => "artifact_generation",
            Self::TestFailures => "test_failures",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in `failed`. The display form is what clients see as the
/// job's error message, so every variant renders a non-empty sentence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobFailure {
    #[error("authentication failed during {stage}: {message}")]
    Auth { stage: JobStatus, message: String },

    #[error("{stage} failed after {attempts} attempt(s): {message}")]
    TransientExhausted {
        stage: JobStatus,
        attempts: u32,
        message: String,
    },

    #[error("{stage} failed: {message}")]
    Permanent { stage: JobStatus, message: String },

    #[error("timeout: {stage} did not finish within {limit_secs}s")]
    Timeout { stage: JobStatus, limit_secs: u64 },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("artifact generation failed: {0}")]
    ArtifactGeneration(String),

    #[error("{failed} test(s) failed and strict test mode is enabled")]
    TestFailures { failed: u32 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Auth { .. } => FailureKind::Auth,
            Self::TransientExhausted { .. } => FailureKind::Transient,
            Self::Permanent { .. } => FailureKind::Permanent,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Workspace(_) => FailureKind::Workspace,
            Self::ArtifactGeneration(_) => FailureKind::ArtifactGeneration,
            Self::TestFailures { .. } => FailureKind::TestFailures,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Escalate a capability error that was not absorbed by the stage.
    pub fn from_capability(stage: JobStatus, err: CapabilityError, attempts: u32) -> Self {
        match err {
            CapabilityError::Auth(message) => Self::Auth { stage, message },
            CapabilityError::Transient(message) => Self::TransientExhausted {
                stage,
                attempts,
                message,
            },
            CapabilityError::Permanent(message) => Self::Permanent { stage, message },
            err @ CapabilityError::FileScoped { .. } => Self::Permanent {
                stage,
                message: err.to_string(),
            },
        }
    }
}

/// Errors from the issue and dependency ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("issue {0} not found")]
    UnknownIssue(String),

    #[error("dependency {0} not found")]
    UnknownDependency(String),

    #[error("issue {id} cannot move from {from} to {to}")]
    IllegalIssueTransition {
        id: String,
        from: IssueStatus,
        to: IssueStatus,
    },
}

/// Errors from allocating or tearing down a job workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("workspace I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the job registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("migration job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("artifacts for job {id} are not available (status: {status})")]
    ArtifactUnavailable { id: Uuid, status: JobStatus },

    #[error("registry is shutting down; no new jobs are accepted")]
    ShuttingDown,
}

/// Errors from the dry-run endpoints. Nothing is recorded anywhere when one
/// of these is returned.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("'{0}' is not a repository URL (expected <host>/<owner>/<repo>)")]
    InvalidRepositoryUrl(String),

    #[error(transparent)]
    Failed(#[from] JobFailure),
}

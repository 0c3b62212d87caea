//! The per-job synchronized slot.
//!
//! A [`JobHandle`] is shared between the job's runner (the only writer) and
//! every status query. Lock order is always `state` → progress → ledger, and
//! no lock is held across an `.await`.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::artifacts::ArtifactSet;
use super::events::{EventBus, JobEvent};
use super::ledger::Ledger;
use super::models::{
    ApiEndpoint, BuildTool, DependencyChange, Issue, JobCounts, JobSnapshot, JobStatus, LogEntry,
    QualityReport, is_valid_transition,
};
use super::progress::ProgressTracker;
use super::request::MigrationPlan;
use crate::errors::JobFailure;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(JobFailure),
    Cancelled,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    /// Counts the ledger does not own (files, tests, endpoints).
    counts: JobCounts,
    build_tool: Option<BuildTool>,
    detected_version: Option<String>,
    endpoints: Vec<ApiEndpoint>,
    quality: Option<QualityReport>,
    published_url: Option<String>,
    failure: Option<JobFailure>,
    error_context: Vec<String>,
    artifacts: Option<ArtifactSet>,
}

pub struct JobHandle {
    id: Uuid,
    plan: Arc<MigrationPlan>,
    created_at: DateTime<Utc>,
    state: RwLock<JobState>,
    progress: Arc<ProgressTracker>,
    ledger: Ledger,
    cancel: CancellationToken,
    events: EventBus,
    failure_log_tail: usize,
}

impl JobHandle {
    pub fn new(id: Uuid, plan: MigrationPlan, events: EventBus, failure_log_tail: usize) -> Self {
        let progress = ProgressTracker::new(
            id,
            JobStatus::Pending.step_description(),
            Some(events.clone()),
        );
        Self {
            id,
            plan: Arc::new(plan),
            created_at: Utc::now(),
            state: RwLock::new(JobState {
                status: JobStatus::Pending,
                started_at: None,
                completed_at: None,
                counts: JobCounts::default(),
                build_tool: None,
                detected_version: None,
                endpoints: Vec::new(),
                quality: None,
                published_url: None,
                failure: None,
                error_context: Vec::new(),
                artifacts: None,
            }),
            progress: Arc::new(progress),
            ledger: Ledger::new(),
            cancel: CancellationToken::new(),
            events,
            failure_log_tail,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plan(&self) -> Arc<MigrationPlan> {
        Arc::clone(&self.plan)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Move to a non-terminal stage. Returns false when the transition is
    /// not legal from the current status (including any terminal status).
    pub fn transition(&self, to: JobStatus) -> bool {
        if to.is_terminal() {
            return false;
        }
        let mut state = self.write();
        if !is_valid_transition(state.status, to) {
            debug!(job_id = %self.id, from = %state.status, to = %to, "transition refused");
            return false;
        }
        state.status = to;
        if to == JobStatus::Cloning {
            state.started_at = Some(Utc::now());
        }
        let percent = self.progress.percent();
        self.progress.advance(percent, to.step_description());
        self.events.publish(&JobEvent::JobStatusChanged {
            job_id: self.id,
            status: to,
            progress: percent,
        });
        true
    }

    /// Enter a terminal state. The first call wins; later calls return
    /// false and change nothing.
    pub fn finish(&self, outcome: JobOutcome) -> bool {
        self.finish_where(outcome, |_| true)
    }

    /// Ask the job to stop. A queued job is cancelled on the spot; a running
    /// job is cancelled by its runner at the next checkpoint. Returns false
    /// when the job was already terminal.
    pub fn request_cancel(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        self.finish_where(JobOutcome::Cancelled, |status| status == JobStatus::Pending);
        true
    }

    fn finish_where(&self, outcome: JobOutcome, when: impl FnOnce(JobStatus) -> bool) -> bool {
        let mut state = self.write();
        if state.status.is_terminal() || !when(state.status) {
            return false;
        }
        let status = outcome.status();
        let percent = self.progress.percent();
        match &outcome {
            JobOutcome::Completed => {
                self.progress.append_log("Migration completed successfully");
                self.progress.advance(100, status.step_description());
            }
            JobOutcome::Failed(failure) => {
                state.error_context = self.progress.tail(self.failure_log_tail);
                self.progress
                    .append_log(format!("Migration failed: {}", failure));
                self.progress.advance(percent, status.step_description());
                state.failure = Some(failure.clone());
            }
            JobOutcome::Cancelled => {
                self.progress.append_log("Migration cancelled");
                self.progress.advance(percent, status.step_description());
            }
        }
        self.progress.freeze();
        state.status = status;
        state.completed_at = Some(Utc::now());
        drop(state);

        info!(job_id = %self.id, status = %status, "job finished");
        self.events.publish(&JobEvent::JobFinished {
            job: self.snapshot(),
        });
        true
    }

    // ── Runner-side setters ──────────────────────────────────────────
    //
    // All of these are no-ops once the job is terminal.

    pub fn update_counts(&self, update: impl FnOnce(&mut JobCounts)) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            update(&mut state.counts);
        }
    }

    pub fn record_analysis(
        &self,
        build_tool: BuildTool,
        detected_version: Option<String>,
        endpoints: Vec<ApiEndpoint>,
    ) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        state.build_tool = Some(build_tool);
        state.detected_version = detected_version;
        state.endpoints = endpoints;
    }

    pub fn set_quality(&self, report: QualityReport) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            state.quality = Some(report);
        }
    }

    pub fn set_published_url(&self, url: String) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            state.published_url = Some(url);
        }
    }

    pub fn set_artifacts(&self, artifacts: ArtifactSet) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            state.artifacts = Some(artifacts);
        }
    }

    // ── Readers ──────────────────────────────────────────────────────

    /// Artifact paths, available only once the job completed.
    pub fn artifacts(&self) -> Option<ArtifactSet> {
        let state = self.read();
        match state.status {
            JobStatus::Completed => state.artifacts.clone(),
            _ => None,
        }
    }

    pub fn endpoints(&self) -> Vec<ApiEndpoint> {
        self.read().endpoints.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.progress.logs()
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.ledger.issues()
    }

    pub fn dependencies(&self) -> Vec<DependencyChange> {
        self.ledger.dependencies()
    }

    /// A consistent copy of the job as clients see it. Never contains the
    /// access token.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        let (progress, current_step) = self.progress.current();
        let ledger = self.ledger.counts();

        let mut counts = state.counts.clone();
        counts.issues_fixed = ledger.fixed;
        counts.issues_remaining = ledger.remaining();
        counts.errors = ledger.errors;
        counts.warnings = ledger.warnings;
        counts.dependencies_upgraded = ledger.dependencies_upgraded;

        let plan = &self.plan;
        JobSnapshot {
            id: self.id,
            status: state.status,
            source_repo_url: plan.source_repo_url.clone(),
            target_repo_name: plan.target_repo_name.clone(),
            platform: plan.platform,
            source_version: plan.source_version.clone(),
            target_version: plan.target_version.clone(),
            conversion_types: plan.conversions.clone(),
            options: plan.options,
            progress,
            current_step,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            counts,
            build_tool: state.build_tool,
            detected_version: state.detected_version.clone(),
            quality: state.quality.clone(),
            published_repo_url: state.published_url.clone(),
            error_message: state.failure.as_ref().map(ToString::to_string),
            error_kind: state.failure.as_ref().map(JobFailure::kind),
            error_context: state.error_context.clone(),
            artifacts_ready: state.status == JobStatus::Completed && state.artifacts.is_some(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::migration::models::{IssueSeverity, NewIssue};
    use crate::migration::request::MigrationRequest;

    fn plan() -> MigrationPlan {
        MigrationRequest {
            source_repo_url: "https://github.com/acme/orders.git".into(),
            conversion_types: vec!["java_version".into()],
            token: Some("ghp_secret".into()),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn job() -> JobHandle {
        JobHandle::new(Uuid::new_v4(), plan(), EventBus::new(), 3)
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Pending);
        assert_eq!(snap.progress, 0);
        assert!(snap.started_at.is_none());
        assert!(!snap.artifacts_ready);
    }

    #[test]
    fn test_transitions_follow_stage_order() {
        let job = job();
        assert!(!job.transition(JobStatus::Analyzing));
        assert!(job.transition(JobStatus::Cloning));
        assert!(job.snapshot().started_at.is_some());
        assert!(job.transition(JobStatus::Analyzing));
        assert!(!job.transition(JobStatus::Cloning));
        assert!(!job.transition(JobStatus::Completed));
        assert_eq!(job.status(), JobStatus::Analyzing);
    }

    #[test]
    fn test_first_terminal_state_wins() {
        let job = job();
        job.transition(JobStatus::Cloning);
        assert!(job.finish(JobOutcome::Failed(JobFailure::Timeout {
            stage: JobStatus::Cloning,
            limit_secs: 300,
        })));
        assert!(!job.finish(JobOutcome::Completed));
        assert!(!job.transition(JobStatus::Analyzing));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn test_terminal_job_ignores_mutations() {
        let job = job();
        job.transition(JobStatus::Cloning);
        job.progress().advance(15, "cloning");
        job.finish(JobOutcome::Cancelled);
        let before = job.snapshot();

        job.progress().advance(80, "late");
        job.update_counts(|c| c.files_modified = 9);
        job.set_published_url("https://example.com/x.git".into());

        let after = job.snapshot();
        assert_eq!(after.progress, before.progress);
        assert_eq!(after.current_step, before.current_step);
        assert_eq!(after.counts.files_modified, 0);
        assert!(after.published_repo_url.is_none());
    }

    #[test]
    fn test_completed_job_reaches_100() {
        let job = job();
        job.transition(JobStatus::Cloning);
        job.progress().advance(95, "reporting");
        job.finish(JobOutcome::Completed);
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert!(snap.completed_at.is_some());
        assert!(snap.error_message.is_none());
    }

    #[test]
    fn test_failed_snapshot_carries_message_and_context() {
        let job = job();
        job.transition(JobStatus::Cloning);
        for i in 0..5 {
            job.progress().append_log(format!("attempt {}", i));
        }
        job.finish(JobOutcome::Failed(JobFailure::Timeout {
            stage: JobStatus::Cloning,
            limit_secs: 300,
        }));
        let snap = job.snapshot();
        assert_eq!(snap.error_kind, Some(FailureKind::Timeout));
        assert!(snap.error_message.unwrap().starts_with("timeout"));
        assert_eq!(snap.error_context.len(), 3);
        assert!(snap.error_context[2].ends_with("attempt 4"));
    }

    #[test]
    fn test_cancel_pending_job_is_immediate() {
        let job = job();
        assert!(job.request_cancel());
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(job.is_cancel_requested());
        assert!(!job.request_cancel());
    }

    #[test]
    fn test_cancel_running_job_only_signals() {
        let job = job();
        job.transition(JobStatus::Cloning);
        assert!(job.request_cancel());
        assert!(job.is_cancel_requested());
        assert_eq!(job.status(), JobStatus::Cloning);
    }

    #[test]
    fn test_artifacts_hidden_until_completed() {
        let job = job();
        job.transition(JobStatus::Cloning);
        let dir = std::path::PathBuf::from("/tmp/artifacts/x");
        job.set_artifacts(ArtifactSet {
            report_html: dir.join("report.html"),
            report_json: dir.join("report.json"),
            load_test_plan: dir.join("load-test.jmx"),
            archive: dir.join("project.zip"),
            dir,
        });
        assert!(job.artifacts().is_none());
        assert!(!job.snapshot().artifacts_ready);
        job.finish(JobOutcome::Completed);
        assert!(job.artifacts().is_some());
        assert!(job.snapshot().artifacts_ready);
    }

    #[test]
    fn test_snapshot_merges_ledger_counts() {
        let job = job();
        let id = job.ledger().record_issue(NewIssue::new(
            IssueSeverity::Error,
            "Deprecated Method",
            "new Integer(..)",
            "App.java",
        ));
        job.ledger().record_issue(NewIssue::new(
            IssueSeverity::Warning,
            "Raw Type",
            "raw List",
            "App.java",
        ));
        job.ledger()
            .resolve_issue(&id, crate::migration::models::IssueStatus::Fixed, None)
            .unwrap();
        let counts = job.snapshot().counts;
        assert_eq!(counts.issues_fixed, 1);
        assert_eq!(counts.issues_remaining, 1);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.warnings, 1);
    }

    #[test]
    fn test_snapshot_never_contains_token() {
        let job = job();
        let json = serde_json::to_string(&job.snapshot()).unwrap();
        assert!(!json.contains("ghp_secret"));
    }

    #[tokio::test]
    async fn test_events_are_published_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let job = JobHandle::new(Uuid::new_v4(), plan(), bus, 3);
        job.transition(JobStatus::Cloning);
        job.finish(JobOutcome::Cancelled);

        let mut types = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg.json).unwrap();
            types.push(value["type"].as_str().unwrap().to_string());
        }
        let status_at = types.iter().position(|t| t == "JobStatusChanged").unwrap();
        let finished_at = types.iter().position(|t| t == "JobFinished").unwrap();
        assert!(status_at < finished_at);
        assert_eq!(types.last().map(String::as_str), Some("JobFinished"));
    }
}

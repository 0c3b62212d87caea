//! The job state machine.
//!
//! A [`JobRunner`] drives one admitted job from `cloning` to a terminal
//! state. Stages run strictly in order; each capability call is raced
//! against the job's cancellation token and a deadline, so a hung remote
//! operation ends the job with a timeout instead of leaving it stuck.
//!
//! | Stage       | Capability                      | Progress window |
//! |-------------|---------------------------------|-----------------|
//! | `cloning`   | [`Fetcher::fetch`]              | 0–20            |
//! | `analyzing` | [`Analyzer::analyze`]           | 20–40           |
//! | `migrating` | [`Transformer::transform`] × N  | 40–70           |
//! | `testing`   | [`Verifier`], [`QualityScanner`]| 70–90           |
//! | `reporting` | [`Fetcher::publish`], [`Reporter`] | 90–99        |
//!
//! [`Fetcher::fetch`]: super::capabilities::Fetcher::fetch
//! [`Fetcher::publish`]: super::capabilities::Fetcher::publish
//! [`Analyzer::analyze`]: super::capabilities::Analyzer::analyze
//! [`Transformer::transform`]: super::capabilities::Transformer::transform
//! [`Verifier`]: super::capabilities::Verifier
//! [`QualityScanner`]: super::capabilities::QualityScanner
//! [`Reporter`]: super::capabilities::Reporter

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::artifacts::ReportInput;
use super::capabilities::{
    AnalysisOutcome, Capabilities, FileError, StageContext, TransformRequest,
};
use super::job::{JobHandle, JobOutcome};
use super::models::{ApiEndpoint, JobStatus};
use super::progress::StageProgress;
use super::workspace::{Workspace, WorkspaceManager};
use crate::errors::{CapabilityError, JobFailure};

/// Retry and deadline settings applied to every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePolicy {
    /// Bound on the whole cloning stage, retries included.
    pub clone_timeout: Duration,
    /// Attempts after the first one for transient fetch errors.
    pub clone_max_retries: u32,
    pub clone_retry_backoff: Duration,
    /// Bound on every other capability call.
    pub stage_timeout: Duration,
    /// Fail the job when any test fails or the test run itself errors.
    pub strict_tests: bool,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            clone_timeout: Duration::from_secs(300),
            clone_max_retries: 3,
            clone_retry_backoff: Duration::from_secs(2),
            stage_timeout: Duration::from_secs(1800),
            strict_tests: false,
        }
    }
}

/// Why a stage did not succeed.
#[derive(Debug)]
enum StageError {
    Failed(JobFailure),
    Cancelled,
}

impl From<JobFailure> for StageError {
    fn from(failure: JobFailure) -> Self {
        Self::Failed(failure)
    }
}

type StageResult<T> = Result<T, StageError>;

pub struct JobRunner {
    job: Arc<JobHandle>,
    caps: Capabilities,
    workspaces: WorkspaceManager,
    policy: PipelinePolicy,
}

impl JobRunner {
    pub fn new(
        job: Arc<JobHandle>,
        caps: Capabilities,
        workspaces: WorkspaceManager,
        policy: PipelinePolicy,
    ) -> Self {
        Self {
            job,
            caps,
            workspaces,
            policy,
        }
    }

    /// Run the job to completion. Returns once the job is terminal, its
    /// workspace is gone and the notifier has been called.
    pub async fn run(self) {
        let job = Arc::clone(&self.job);
        if !job.transition(JobStatus::Cloning) {
            debug!(job_id = %job.id(), status = %job.status(), "job not runnable, skipping");
            return;
        }
        info!(job_id = %job.id(), "job started");

        let outcome = match self.workspaces.allocate(job.id()) {
            Ok(workspace) => {
                let result = self.drive(&workspace).await;
                // Tear down before the terminal status becomes visible.
                if let Err(e) = workspace.destroy().await {
                    warn!(job_id = %job.id(), error = %e, "failed to remove workspace");
                }
                match result {
                    Ok(()) => JobOutcome::Completed,
                    Err(StageError::Failed(failure)) => JobOutcome::Failed(failure),
                    Err(StageError::Cancelled) => JobOutcome::Cancelled,
                }
            }
            Err(e) => JobOutcome::Failed(JobFailure::Workspace(e.to_string())),
        };

        if let JobOutcome::Failed(failure) = &outcome {
            warn!(job_id = %job.id(), kind = %failure.kind(), error = %failure, "job failed");
        }
        job.finish(outcome);
        self.notify().await;
    }

    async fn drive(&self, workspace: &Workspace) -> StageResult<()> {
        let plan = self.job.plan();

        self.clone_stage(workspace).await?;

        self.advance_to(JobStatus::Analyzing)?;
        let endpoints = self.analyze_stage(workspace).await?;

        self.advance_to(JobStatus::Migrating)?;
        self.migrate_stage(workspace).await?;

        if plan.options.run_tests {
            self.advance_to(JobStatus::Testing)?;
            self.verify_stage(workspace, &endpoints).await?;
        } else {
            self.job.progress().append_log("Tests skipped");
        }

        self.advance_to(JobStatus::Reporting)?;
        self.report_stage(workspace, endpoints).await
    }

    // ── Stages ───────────────────────────────────────────────────────

    async fn clone_stage(&self, workspace: &Workspace) -> StageResult<()> {
        let ctx = self.context(workspace, 0, JobStatus::Cloning.completion_floor());
        let plan = &ctx.plan;
        ctx.progress.log(format!(
            "Cloning {} ({})",
            plan.source_repo_url,
            plan.platform.as_str()
        ));

        let attempts = async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.caps.fetcher.fetch(&ctx).await {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) if e.is_transient() && attempt <= self.policy.clone_max_retries => {
                        ctx.progress.log(format!(
                            "Clone attempt {} failed: {}. Retrying in {}ms",
                            attempt,
                            e,
                            self.policy.clone_retry_backoff.as_millis()
                        ));
                        clear_dir(&ctx.source_dir).await;
                        tokio::time::sleep(self.policy.clone_retry_backoff).await;
                    }
                    Err(e) => {
                        return Err(JobFailure::from_capability(JobStatus::Cloning, e, attempt));
                    }
                }
            }
        };

        let outcome = self
            .guarded(JobStatus::Cloning, self.policy.clone_timeout, attempts)
            .await??;
        match outcome.revision {
            Some(rev) => ctx.progress.log(format!("Repository cloned at {}", rev)),
            None => ctx.progress.log("Repository cloned"),
        }
        Ok(())
    }

    async fn analyze_stage(&self, workspace: &Workspace) -> StageResult<Vec<ApiEndpoint>> {
        let ctx = self.context(
            workspace,
            JobStatus::Cloning.completion_floor(),
            JobStatus::Analyzing.completion_floor(),
        );
        let result = self
            .guarded(
                JobStatus::Analyzing,
                self.policy.stage_timeout,
                self.caps.analyzer.analyze(&ctx),
            )
            .await?;

        let analysis = match result {
            Ok(analysis) => analysis,
            Err(CapabilityError::FileScoped {
                path,
                line,
                message,
            }) => {
                let path = path.display().to_string();
                ctx.progress
                    .log(format!("Could not analyze {}: {}", path, message));
                self.job
                    .ledger()
                    .record_file_error(None, path, line, message);
                AnalysisOutcome::default()
            }
            Err(e) => return Err(JobFailure::from_capability(JobStatus::Analyzing, e, 1).into()),
        };

        let ledger = self.job.ledger();
        for issue in analysis.issues {
            ledger.record_issue(issue);
        }
        for dep in analysis.dependencies {
            ledger.record_dependency(dep);
        }
        self.record_file_errors(None, &analysis.file_errors);

        let counts = ledger.counts();
        ctx.progress.log(format!(
            "Analysis complete: {} Java files, {} issues, {} dependencies, {} endpoints",
            analysis.java_files,
            counts.total_issues,
            counts.dependencies,
            analysis.endpoints.len()
        ));
        if let Some(version) = &analysis.detected_version {
            ctx.progress.log(format!(
                "Detected {} project on Java {}",
                analysis.build_tool.as_str(),
                version
            ));
        }

        self.job.update_counts(|c| {
            c.total_files = analysis.total_files;
            c.java_files = analysis.java_files;
        });
        let endpoints = analysis.endpoints;
        self.job.record_analysis(
            analysis.build_tool,
            analysis.detected_version,
            endpoints.clone(),
        );
        Ok(endpoints)
    }

    async fn migrate_stage(&self, workspace: &Workspace) -> StageResult<()> {
        let plan = self.job.plan();
        let stage = self.context(
            workspace,
            JobStatus::Analyzing.completion_floor(),
            JobStatus::Migrating.completion_floor(),
        );
        let total = plan.conversions.len().max(1);
        let mut modified: HashSet<String> = HashSet::new();

        for (index, conversion) in plan.conversions.iter().enumerate() {
            self.checkpoint()?;
            let from = (index * 100 / total) as u8;
            let to = ((index + 1) * 100 / total) as u8;
            let ctx = StageContext {
                progress: stage.progress.slice(from, to),
                ..stage.clone()
            };
            ctx.progress
                .report(0, format!("Applying {} conversion", conversion));

            let request = TransformRequest {
                conversion: conversion.clone(),
                issues: self.job.ledger().open_issues_for(conversion),
                dependencies: self.job.ledger().dependencies(),
            };
            let result = self
                .guarded(
                    JobStatus::Migrating,
                    self.policy.stage_timeout,
                    self.caps.transformer.transform(&ctx, &request),
                )
                .await?;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(CapabilityError::FileScoped {
                    path,
                    line,
                    message,
                }) => {
                    let path = path.display().to_string();
                    ctx.progress.log(format!(
                        "{}: could not transform {}: {}",
                        conversion, path, message
                    ));
                    self.job
                        .ledger()
                        .record_file_error(Some(conversion.as_str()), path, line, message);
                    continue;
                }
                Err(e) => {
                    return Err(JobFailure::from_capability(JobStatus::Migrating, e, 1).into());
                }
            };

            let ledger = self.job.ledger();
            for resolution in &outcome.resolutions {
                if let Err(e) = ledger.resolve_issue(
                    &resolution.issue_id,
                    resolution.status,
                    resolution.fix_description.clone(),
                ) {
                    warn!(job_id = %self.job.id(), error = %e, "ignoring issue resolution");
                }
            }
            for upgrade in &outcome.upgrades {
                if let Err(e) = ledger.upgrade_dependency(&upgrade.dependency_id, &upgrade.new_version) {
                    warn!(job_id = %self.job.id(), error = %e, "ignoring dependency upgrade");
                }
            }
            for dep in &outcome.failed_dependencies {
                if let Err(e) = ledger.fail_dependency(dep) {
                    warn!(job_id = %self.job.id(), error = %e, "ignoring dependency failure");
                }
            }
            self.record_file_errors(Some(conversion.as_str()), &outcome.file_errors);
            for change in &outcome.changes {
                ctx.progress.log(change.clone());
            }

            modified.extend(outcome.modified_files);
            let files_modified = modified.len() as u32;
            self.job.update_counts(|c| c.files_modified = files_modified);
            ctx.progress.report(
                100,
                format!("{} conversion applied", conversion),
            );
        }

        let counts = self.job.ledger().counts();
        stage.progress.log(format!(
            "Migration applied: {} files modified, {} issues fixed, {} remaining",
            modified.len(),
            counts.fixed,
            counts.remaining()
        ));
        Ok(())
    }

    async fn verify_stage(
        &self,
        workspace: &Workspace,
        endpoints: &[ApiEndpoint],
    ) -> StageResult<()> {
        let plan = self.job.plan();
        let stage = self.context(
            workspace,
            JobStatus::Migrating.completion_floor(),
            JobStatus::Testing.completion_floor(),
        );
        let tests_window = if plan.options.run_quality_scan { 70 } else { 100 };
        let ctx = StageContext {
            progress: stage.progress.slice(0, tests_window),
            ..stage.clone()
        };

        let result = self
            .guarded(
                JobStatus::Testing,
                self.policy.stage_timeout,
                self.caps.verifier.verify(&ctx, endpoints),
            )
            .await?;
        match result {
            Ok(outcome) => {
                ctx.progress.log(format!(
                    "Tests: {} run, {} passed, {} failed",
                    outcome.tests_run, outcome.tests_passed, outcome.tests_failed
                ));
                self.job.update_counts(|c| {
                    c.tests_run = outcome.tests_run;
                    c.tests_passed = outcome.tests_passed;
                    c.tests_failed = outcome.tests_failed;
                    c.api_endpoints_validated = outcome.endpoints_validated;
                    c.api_endpoints_working = outcome.endpoints_working;
                });
                if self.policy.strict_tests && outcome.tests_failed > 0 {
                    return Err(JobFailure::TestFailures {
                        failed: outcome.tests_failed,
                    }
                    .into());
                }
            }
            Err(e) if self.policy.strict_tests => {
                return Err(JobFailure::from_capability(JobStatus::Testing, e, 1).into());
            }
            Err(e) => ctx.progress.log(format!("Test run failed: {}", e)),
        }

        if plan.options.run_quality_scan {
            self.checkpoint()?;
            let ctx = StageContext {
                progress: stage.progress.slice(tests_window, 100),
                ..stage.clone()
            };
            ctx.progress.report(0, "Running quality scan");
            let result = self
                .guarded(
                    JobStatus::Testing,
                    self.policy.stage_timeout,
                    self.caps.quality.scan(&ctx),
                )
                .await;
            match result {
                Ok(Ok(report)) => {
                    ctx.progress
                        .log(format!("Quality gate: {}", report.quality_gate));
                    self.job.set_quality(report);
                }
                Ok(Err(e)) => ctx.progress.log(format!("Quality scan failed: {}", e)),
                Err(StageError::Failed(f)) => {
                    ctx.progress.log(format!("Quality scan failed: {}", f))
                }
                Err(StageError::Cancelled) => return Err(StageError::Cancelled),
            }
        }
        Ok(())
    }

    async fn report_stage(
        &self,
        workspace: &Workspace,
        endpoints: Vec<ApiEndpoint>,
    ) -> StageResult<()> {
        let ctx = self.context(workspace, JobStatus::Testing.completion_floor(), 99);

        ctx.progress.report(0, "Publishing migrated repository");
        match self
            .guarded(
                JobStatus::Reporting,
                self.policy.stage_timeout,
                self.caps.fetcher.publish(&ctx),
            )
            .await
        {
            Ok(Ok(Some(url))) => {
                ctx.progress.log(format!("Published to {}", url));
                self.job.set_published_url(url);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => ctx.progress.log(format!("Publishing failed: {}", e)),
            Err(StageError::Failed(f)) => ctx.progress.log(format!("Publishing failed: {}", f)),
            Err(StageError::Cancelled) => return Err(StageError::Cancelled),
        }

        self.checkpoint()?;
        ctx.progress.report(30, "Generating report and artifacts");
        // The report describes the job as it will be once artifacts exist.
        let mut snapshot = self.job.snapshot();
        snapshot.status = JobStatus::Completed;
        snapshot.progress = 100;
        let input = ReportInput {
            snapshot,
            issues: self.job.issues(),
            dependencies: self.job.dependencies(),
            logs: self.job.logs(),
            workspace: ctx.source_dir.clone(),
            endpoints,
        };

        let generated = self
            .guarded(
                JobStatus::Reporting,
                self.policy.stage_timeout,
                self.caps.reporter.generate(&input),
            )
            .await;
        let artifacts = match generated {
            Ok(Ok(artifacts)) => artifacts,
            Ok(Err(e)) => return Err(JobFailure::ArtifactGeneration(e.to_string()).into()),
            Err(StageError::Failed(JobFailure::Timeout { .. })) => {
                self.caps.reporter.discard(self.job.id()).await;
                return Err(JobFailure::ArtifactGeneration(format!(
                    "artifact generation did not finish within {}s",
                    self.policy.stage_timeout.as_secs()
                ))
                .into());
            }
            Err(e) => {
                self.caps.reporter.discard(self.job.id()).await;
                return Err(e);
            }
        };

        if self.job.is_cancel_requested() {
            self.caps.reporter.discard(self.job.id()).await;
            return Err(StageError::Cancelled);
        }
        self.job.set_artifacts(artifacts);
        ctx.progress.report(100, "Artifacts ready");
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn context(&self, workspace: &Workspace, start: u8, end: u8) -> StageContext {
        StageContext {
            job_id: self.job.id(),
            plan: self.job.plan(),
            workspace_root: workspace.root().to_path_buf(),
            source_dir: workspace.source_dir(),
            progress: StageProgress::new(Arc::clone(self.job.progress()), start, end),
            cancel: self.job.cancel_token(),
        }
    }

    fn checkpoint(&self) -> StageResult<()> {
        if self.job.is_cancel_requested() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record the previous stage's floor and enter `next`.
    fn advance_to(&self, next: JobStatus) -> StageResult<()> {
        self.checkpoint()?;
        let current = self.job.status();
        self.job
            .progress()
            .advance(current.completion_floor(), next.step_description());
        if self.job.transition(next) {
            return Ok(());
        }
        self.checkpoint()?;
        Err(JobFailure::Internal(format!("illegal transition {} -> {}", current, next)).into())
    }

    /// Race `fut` against cancellation and a deadline.
    async fn guarded<T>(
        &self,
        stage: JobStatus,
        limit: Duration,
        fut: impl Future<Output = T>,
    ) -> StageResult<T> {
        let cancel = self.job.cancel_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StageError::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(value) => Ok(value),
                Err(_) => {
                    self.job.progress().append_log(format!(
                        "{} exceeded its {}s limit",
                        stage,
                        limit.as_secs()
                    ));
                    Err(JobFailure::Timeout {
                        stage,
                        limit_secs: limit.as_secs(),
                    }
                    .into())
                }
            },
        }
    }

    fn record_file_errors(&self, conversion: Option<&str>, errors: &[FileError]) {
        for err in errors {
            self.job.ledger().record_file_error(
                conversion,
                err.path.clone(),
                err.line,
                err.message.clone(),
            );
        }
    }

    async fn notify(&self) {
        let plan = self.job.plan();
        let Some(address) = plan.notify_email.as_deref() else {
            return;
        };
        let snapshot = self.job.snapshot();
        if let Err(e) = self.caps.notifier.notify(address, &snapshot).await {
            warn!(job_id = %self.job.id(), error = %e, "notification failed");
        }
    }
}

/// Remove a partial checkout so the next fetch attempt starts clean.
async fn clear_dir(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to clear partial checkout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::errors::FailureKind;
    use crate::migration::artifacts::{ArtifactSet, FileReporter};
    use crate::migration::capabilities::{
        Analyzer, DependencyUpgrade, FetchOutcome, Fetcher, IssueResolution, Notifier,
        QualityScanner, Reporter, TransformOutcome, Transformer, Verifier, VerifyOutcome,
    };
    use crate::migration::events::{EventBus, PublishedEvent};
    use crate::migration::models::{
        IssueSeverity, IssueStatus, JobSnapshot, NewDependency, NewIssue, QualityReport,
    };
    use crate::migration::request::MigrationRequest;

    // ── Scripted capabilities ────────────────────────────────────────

    enum FetchScript {
        Ok,
        TransientThenOk(u32),
        AlwaysTransient,
        Auth,
        Hang,
    }

    struct ScriptedFetcher {
        script: FetchScript,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(script: FetchScript) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, ctx: &StageContext) -> Result<FetchOutcome, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = match self.script {
                FetchScript::Ok => None,
                FetchScript::TransientThenOk(n) if call <= n => {
                    Some(CapabilityError::Transient("connection reset".into()))
                }
                FetchScript::TransientThenOk(_) => None,
                FetchScript::AlwaysTransient => {
                    Some(CapabilityError::Transient("connection reset".into()))
                }
                FetchScript::Auth => Some(CapabilityError::Auth("bad credentials".into())),
                FetchScript::Hang => {
                    std::future::pending::<()>().await;
                    None
                }
            };
            if let Some(e) = fail {
                return Err(e);
            }
            std::fs::create_dir_all(ctx.source_dir.join("src")).unwrap();
            std::fs::write(
                ctx.source_dir.join("src/App.java"),
                "class App { Integer x = new Integer(1); }",
            )
            .unwrap();
            Ok(FetchOutcome {
                revision: Some("abc123".into()),
            })
        }
    }

    struct FakeAnalyzer;

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze(&self, ctx: &StageContext) -> Result<AnalysisOutcome, CapabilityError> {
            ctx.progress.report(50, "scanning");
            let mut issue = NewIssue::new(
                IssueSeverity::Error,
                "Deprecated Method",
                "new Integer(int) is deprecated",
                "src/App.java",
            );
            issue.conversion = Some("java_version".into());
            Ok(AnalysisOutcome {
                total_files: 1,
                java_files: 1,
                issues: vec![issue],
                dependencies: vec![NewDependency {
                    group_id: "junit".into(),
                    artifact_id: "junit".into(),
                    current_version: "4.12".into(),
                    proposed_version: Some("4.13.2".into()),
                }],
                ..Default::default()
            })
        }
    }

    enum TransformScript {
        FixAll,
        FileScoped,
        Permanent,
    }

    struct FakeTransformer(TransformScript);

    #[async_trait]
    impl Transformer for FakeTransformer {
        async fn transform(
            &self,
            _ctx: &StageContext,
            request: &TransformRequest,
        ) -> Result<TransformOutcome, CapabilityError> {
            match self.0 {
                TransformScript::FixAll => Ok(TransformOutcome {
                    modified_files: vec!["src/App.java".into(), "src/App.java".into()],
                    resolutions: request
                        .issues
                        .iter()
                        .map(|i| IssueResolution {
                            issue_id: i.id.clone(),
                            status: IssueStatus::Fixed,
                            fix_description: Some("use valueOf".into()),
                        })
                        .collect(),
                    upgrades: vec![DependencyUpgrade {
                        dependency_id: "junit:junit".into(),
                        new_version: "4.13.2".into(),
                    }],
                    ..Default::default()
                }),
                TransformScript::FileScoped => Err(CapabilityError::file_scoped(
                    "src/Broken.java",
                    Some(3),
                    "unparseable source",
                )),
                TransformScript::Permanent => {
                    Err(CapabilityError::Permanent("rewriter crashed".into()))
                }
            }
        }
    }

    struct FakeVerifier {
        failed: u32,
    }

    #[async_trait]
    impl Verifier for FakeVerifier {
        async fn verify(
            &self,
            _ctx: &StageContext,
            _endpoints: &[ApiEndpoint],
        ) -> Result<VerifyOutcome, CapabilityError> {
            Ok(VerifyOutcome {
                tests_run: 10,
                tests_passed: 10 - self.failed,
                tests_failed: self.failed,
                ..Default::default()
            })
        }
    }

    struct BrokenScanner;

    #[async_trait]
    impl QualityScanner for BrokenScanner {
        async fn scan(&self, _ctx: &StageContext) -> Result<QualityReport, CapabilityError> {
            Err(CapabilityError::Transient("scanner unreachable".into()))
        }
    }

    struct RecordingNotifier(Mutex<Vec<(String, JobStatus)>>);

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, address: &str, snapshot: &JobSnapshot) -> Result<(), CapabilityError> {
            self.0
                .lock()
                .unwrap()
                .push((address.to_string(), snapshot.status));
            Ok(())
        }
    }

    struct FailingReporter;

    #[async_trait]
    impl Reporter for FailingReporter {
        async fn generate(&self, _input: &ReportInput) -> Result<ArtifactSet, CapabilityError> {
            Err(CapabilityError::Permanent("disk full".into()))
        }
    }

    struct Harness {
        _tmp: TempDir,
        workspaces: WorkspaceManager,
        caps: Capabilities,
        notifier: Arc<RecordingNotifier>,
        fetcher: Arc<ScriptedFetcher>,
    }

    fn harness(fetch: FetchScript, transform: TransformScript) -> Harness {
        let tmp = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));
        let fetcher = Arc::new(ScriptedFetcher::new(fetch));
        let caps = Capabilities {
            fetcher: fetcher.clone(),
            analyzer: Arc::new(FakeAnalyzer),
            transformer: Arc::new(FakeTransformer(transform)),
            verifier: Arc::new(FakeVerifier { failed: 0 }),
            quality: Arc::new(BrokenScanner),
            reporter: Arc::new(FileReporter::new(tmp.path().join("artifacts"))),
            notifier: notifier.clone(),
        };
        Harness {
            workspaces: WorkspaceManager::new(tmp.path().join("work")),
            _tmp: tmp,
            caps,
            notifier,
            fetcher,
        }
    }

    fn policy() -> PipelinePolicy {
        PipelinePolicy {
            clone_timeout: Duration::from_secs(5),
            clone_max_retries: 2,
            clone_retry_backoff: Duration::from_millis(1),
            stage_timeout: Duration::from_secs(5),
            strict_tests: false,
        }
    }

    fn job(request: MigrationRequest) -> Arc<JobHandle> {
        Arc::new(JobHandle::new(
            Uuid::new_v4(),
            request.validate().unwrap(),
            EventBus::new(),
            10,
        ))
    }

    fn request() -> MigrationRequest {
        MigrationRequest {
            source_repo_url: "https://github.com/acme/orders.git".into(),
            conversion_types: vec!["java_version".into()],
            email: Some("dev@example.com".into()),
            ..Default::default()
        }
    }

    async fn run(h: &Harness, job: &Arc<JobHandle>, policy: PipelinePolicy) {
        JobRunner::new(
            Arc::clone(job),
            h.caps.clone(),
            h.workspaces.clone(),
            policy,
        )
        .run()
        .await;
    }

    // ── Tests ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_happy_path_completes() {
        let h = harness(FetchScript::Ok, TransformScript::FixAll);
        let job = job(request());
        run(&h, &job, policy()).await;

        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.counts.files_modified, 1);
        assert_eq!(snap.counts.issues_fixed, 1);
        assert_eq!(snap.counts.dependencies_upgraded, 1);
        assert_eq!(snap.counts.tests_run, 10);
        assert!(snap.artifacts_ready);
        assert!(!h.workspaces.path_for(job.id()).exists());
        assert!(job.artifacts().unwrap().archive.exists());

        let notified = h.notifier.0.lock().unwrap();
        assert_eq!(
            notified.as_slice(),
            &[("dev@example.com".to_string(), JobStatus::Completed)]
        );
    }

    #[tokio::test]
    async fn test_transient_clone_errors_are_retried() {
        let h = harness(FetchScript::TransientThenOk(2), TransformScript::FixAll);
        let job = job(request());
        run(&h, &job, policy()).await;
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clone_retries_are_bounded() {
        let h = harness(FetchScript::AlwaysTransient, TransformScript::FixAll);
        let job = job(request());
        run(&h, &job, policy()).await;
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error_kind, Some(FailureKind::Transient));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 3);
        assert!(!snap.error_context.is_empty());
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let h = harness(FetchScript::Auth, TransformScript::FixAll);
        let job = job(request());
        run(&h, &job, policy()).await;
        assert_eq!(job.snapshot().error_kind, Some(FailureKind::Auth));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_clone_times_out() {
        let h = harness(FetchScript::Hang, TransformScript::FixAll);
        let job = job(request());
        run(
            &h,
            &job,
            PipelinePolicy {
                clone_timeout: Duration::from_millis(100),
                ..policy()
            },
        )
        .await;
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error_kind, Some(FailureKind::Timeout));
        assert!(snap.error_message.unwrap().contains("timeout"));
        assert!(!h.workspaces.path_for(job.id()).exists());
    }

    #[tokio::test]
    async fn test_file_scoped_transform_error_does_not_fail_job() {
        let h = harness(FetchScript::Ok, TransformScript::FileScoped);
        let job = job(request());
        run(&h, &job, policy()).await;
        assert_eq!(job.status(), JobStatus::Completed);
        let manual: Vec<_> = job
            .issues()
            .into_iter()
            .filter(|i| i.status == IssueStatus::ManualReview)
            .collect();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].file_path, "src/Broken.java");
        assert_eq!(manual[0].conversion.as_deref(), Some("java_version"));
    }

    #[tokio::test]
    async fn test_permanent_transform_error_fails_job() {
        let h = harness(FetchScript::Ok, TransformScript::Permanent);
        let job = job(request());
        run(&h, &job, policy()).await;
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error_kind, Some(FailureKind::Permanent));
        assert!(!snap.artifacts_ready);
    }

    #[tokio::test]
    async fn test_cancel_while_cloning() {
        let h = harness(FetchScript::Hang, TransformScript::FixAll);
        let job = job(request());
        let handle = tokio::spawn({
            let job = Arc::clone(&job);
            let caps = h.caps.clone();
            let workspaces = h.workspaces.clone();
            async move { JobRunner::new(job, caps, workspaces, policy()).run().await }
        });
        while job.status() != JobStatus::Cloning {
            tokio::task::yield_now().await;
        }
        job.request_cancel();
        handle.await.unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert!(!h.workspaces.path_for(job.id()).exists());
    }

    #[tokio::test]
    async fn test_strict_tests_fail_job() {
        let mut h = harness(FetchScript::Ok, TransformScript::FixAll);
        h.caps.verifier = Arc::new(FakeVerifier { failed: 2 });
        let job = job(request());
        run(
            &h,
            &job,
            PipelinePolicy {
                strict_tests: true,
                ..policy()
            },
        )
        .await;
        let snap = job.snapshot();
        assert_eq!(snap.error_kind, Some(FailureKind::TestFailures));
        assert_eq!(snap.counts.tests_failed, 2);
    }

    #[tokio::test]
    async fn test_failing_tests_are_advisory_by_default() {
        let mut h = harness(FetchScript::Ok, TransformScript::FixAll);
        h.caps.verifier = Arc::new(FakeVerifier { failed: 2 });
        let job = job(request());
        run(&h, &job, policy()).await;
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.snapshot().counts.tests_failed, 2);
    }

    #[tokio::test]
    async fn test_quality_scan_failure_is_not_fatal() {
        let h = harness(FetchScript::Ok, TransformScript::FixAll);
        let job = job(MigrationRequest {
            run_quality_scan: true,
            ..request()
        });
        run(&h, &job, policy()).await;
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.snapshot().quality.is_none());
        assert!(
            job.logs()
                .iter()
                .any(|l| l.message.starts_with("Quality scan failed"))
        );
    }

    #[tokio::test]
    async fn test_reporter_failure_fails_job() {
        let mut h = harness(FetchScript::Ok, TransformScript::FixAll);
        h.caps.reporter = Arc::new(FailingReporter);
        let job = job(request());
        run(&h, &job, policy()).await;
        let snap = job.snapshot();
        assert_eq!(snap.error_kind, Some(FailureKind::ArtifactGeneration));
        assert!(!snap.artifacts_ready);
    }

    fn status_changes(rx: &mut tokio::sync::broadcast::Receiver<PublishedEvent>) -> Vec<String> {
        let mut statuses = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg.json).unwrap();
            if value["type"] == "JobStatusChanged" {
                statuses.push(value["data"]["status"].as_str().unwrap().to_string());
            }
        }
        statuses
    }

    #[tokio::test]
    async fn test_stages_run_in_order_with_tests_enabled() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let h = harness(FetchScript::Ok, TransformScript::FixAll);
        let job = Arc::new(JobHandle::new(
            Uuid::new_v4(),
            request().validate().unwrap(),
            bus,
            10,
        ));
        run(&h, &job, policy()).await;
        assert_eq!(job.status(), JobStatus::Completed);

        assert_eq!(
            status_changes(&mut rx),
            vec!["cloning", "analyzing", "migrating", "testing", "reporting"]
        );
        let snap = job.snapshot();
        assert_eq!(snap.counts.tests_run, 10);
        assert_eq!(snap.counts.tests_passed, 10);
        assert_eq!(snap.progress, 100);
    }

    #[tokio::test]
    async fn test_skipping_tests_goes_straight_to_reporting() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let h = harness(FetchScript::Ok, TransformScript::FixAll);
        let job = Arc::new(JobHandle::new(
            Uuid::new_v4(),
            MigrationRequest {
                run_tests: false,
                ..request()
            }
            .validate()
            .unwrap(),
            bus,
            10,
        ));
        run(&h, &job, policy()).await;
        assert_eq!(job.status(), JobStatus::Completed);

        assert_eq!(
            status_changes(&mut rx),
            vec!["cloning", "analyzing", "migrating", "reporting"]
        );
        assert_eq!(job.snapshot().counts.tests_run, 0);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let h = harness(FetchScript::Ok, TransformScript::FixAll);
        let job = Arc::new(JobHandle::new(
            Uuid::new_v4(),
            request().validate().unwrap(),
            bus,
            10,
        ));
        run(&h, &job, policy()).await;

        let mut last = 0u64;
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg.json).unwrap();
            if value["type"] == "JobProgress" {
                let pct = value["data"]["percent"].as_u64().unwrap();
                assert!(pct >= last, "progress went from {} to {}", last, pct);
                last = pct;
            }
        }
        assert_eq!(last, 100);
    }
}

//! Job registry and FIFO scheduler.
//!
//! Jobs live in a sharded [`DashMap`] keyed by id, so reads of one job never
//! wait on another. Admission is a single dispatcher task that pulls job ids
//! off a queue in creation order and starts each one once a [`Semaphore`]
//! permit is free; the permit travels with the runner and is released when
//! the job is terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use super::artifacts::ArtifactKind;
use super::capabilities::Capabilities;
use super::events::{EventBus, JobEvent};
use super::job::JobHandle;
use super::machine::{JobRunner, PipelinePolicy};
use super::models::{DependencyChange, Issue, JobSnapshot, JobStatus, LogEntry};
use super::request::MigrationRequest;
use super::workspace::WorkspaceManager;
use crate::errors::RegistryError;

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub workspace_root: PathBuf,
    pub max_concurrent_jobs: usize,
    pub policy: PipelinePolicy,
    /// Log lines copied into a failed job's error context.
    pub failure_log_tail: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("tmp/migrations"),
            max_concurrent_jobs: 4,
            policy: PipelinePolicy::default(),
            failure_log_tail: 20,
        }
    }
}

/// A registered job plus its creation sequence number, which orders
/// listings even when two jobs share a timestamp.
struct Slot {
    seq: u64,
    job: Arc<JobHandle>,
}

type JobTable = Arc<DashMap<Uuid, Slot>>;

pub struct JobRegistry {
    jobs: JobTable,
    queue: mpsc::UnboundedSender<Uuid>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    events: EventBus,
    failure_log_tail: usize,
    next_seq: AtomicU64,
}

impl JobRegistry {
    /// Build the registry and spawn its dispatcher on the current runtime.
    pub fn start(settings: RegistrySettings, caps: Capabilities, events: EventBus) -> Self {
        let jobs: JobTable = Arc::new(DashMap::new());
        let (queue, rx) = mpsc::unbounded_channel();
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            jobs: Arc::clone(&jobs),
            slots: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
            caps,
            workspaces: WorkspaceManager::new(settings.workspace_root),
            policy: settings.policy,
            tracker: tracker.clone(),
            shutdown: shutdown.clone(),
        };
        tracker.spawn(dispatcher.run(rx));

        Self {
            jobs,
            queue,
            tracker,
            shutdown,
            events,
            failure_log_tail: settings.failure_log_tail,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validate and queue a new job. The returned snapshot is `pending`.
    pub fn create(&self, request: &MigrationRequest) -> Result<JobSnapshot, RegistryError> {
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }
        let plan = request.validate()?;
        let id = Uuid::new_v4();
        let job = Arc::new(JobHandle::new(
            id,
            plan,
            self.events.clone(),
            self.failure_log_tail,
        ));
        {
            let plan = job.plan();
            job.progress().append_log(format!(
                "Migration queued: Java {} -> Java {} ({})",
                plan.source_version,
                plan.target_version,
                plan.conversions.join(", ")
            ));
        }
        let snapshot = job.snapshot();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.jobs.insert(id, Slot { seq, job });
        self.events.publish(&JobEvent::JobCreated {
            job: snapshot.clone(),
        });

        if self.queue.send(id).is_err() {
            if let Some((_, slot)) = self.jobs.remove(&id) {
                slot.job.request_cancel();
            }
            return Err(RegistryError::ShuttingDown);
        }
        info!(job_id = %id, "job queued");
        Ok(snapshot)
    }

    pub fn get(&self, id: Uuid) -> Result<JobSnapshot, RegistryError> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Every job, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<(u64, JobSnapshot)> = self
            .jobs
            .iter()
            .map(|e| (e.value().seq, e.value().job.snapshot()))
            .collect();
        jobs.sort_by_key(|(seq, _)| *seq);
        jobs.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Request cancellation. Idempotent: cancelling a terminal job returns
    /// its snapshot unchanged.
    pub fn cancel(&self, id: Uuid) -> Result<JobSnapshot, RegistryError> {
        let job = self.handle(id)?;
        if job.request_cancel() {
            info!(job_id = %id, "cancellation requested");
        }
        Ok(job.snapshot())
    }

    pub fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, RegistryError> {
        Ok(self.handle(id)?.logs())
    }

    pub fn issues(&self, id: Uuid) -> Result<Vec<Issue>, RegistryError> {
        Ok(self.handle(id)?.issues())
    }

    pub fn dependencies(&self, id: Uuid) -> Result<Vec<DependencyChange>, RegistryError> {
        Ok(self.handle(id)?.dependencies())
    }

    /// Path of one generated artifact. Only completed jobs have artifacts.
    pub fn artifact(&self, id: Uuid, kind: ArtifactKind) -> Result<PathBuf, RegistryError> {
        let job = self.handle(id)?;
        match job.artifacts() {
            Some(set) => Ok(set.path(kind).to_path_buf()),
            None => Err(RegistryError::ArtifactUnavailable {
                id,
                status: job.status(),
            }),
        }
    }

    /// Jobs that are neither queued nor terminal.
    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|e| {
                let status = e.value().job.status();
                !status.is_terminal() && status != JobStatus::Pending
            })
            .count()
    }

    /// Stop admitting jobs, cancel everything in flight and wait until
    /// every runner has cleaned up.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let jobs: Vec<Arc<JobHandle>> = self.jobs.iter().map(|e| Arc::clone(&e.value().job)).collect();
        for job in jobs {
            job.request_cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("job registry stopped");
    }

    fn handle(&self, id: Uuid) -> Result<Arc<JobHandle>, RegistryError> {
        self.jobs
            .get(&id)
            .map(|e| Arc::clone(&e.value().job))
            .ok_or(RegistryError::NotFound(id))
    }
}

/// Owns what the admission loop needs, so the registry itself is never
/// referenced from a spawned task.
struct Dispatcher {
    jobs: JobTable,
    slots: Arc<Semaphore>,
    caps: Capabilities,
    workspaces: WorkspaceManager,
    policy: PipelinePolicy,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Uuid>) {
        loop {
            let id = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            let Some(job) = self.jobs.get(&id).map(|e| Arc::clone(&e.value().job)) else {
                continue;
            };
            if job.is_terminal() {
                debug!(job_id = %id, "skipping job cancelled while queued");
                continue;
            }

            // Head of line waits for a slot; a cancel while waiting skips it.
            let cancel = job.cancel_token();
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = cancel.cancelled() => continue,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let runner = JobRunner::new(
                job,
                self.caps.clone(),
                self.workspaces.clone(),
                self.policy.clone(),
            );
            self.tracker.spawn(async move {
                runner.run().await;
                drop(permit);
            });
        }
        debug!("dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::errors::CapabilityError;
    use crate::migration::artifacts::FileReporter;
    use crate::migration::capabilities::{
        AnalysisOutcome, Analyzer, FetchOutcome, Fetcher, Notifier, QualityScanner,
        StageContext, TransformOutcome, TransformRequest, Transformer, Verifier, VerifyOutcome,
    };
    use crate::migration::models::{ApiEndpoint, IssueSeverity, NewIssue, QualityReport};

    /// Blocks every fetch until the test hands out a release permit.
    struct GatedFetcher {
        release: Semaphore,
        running: AtomicUsize,
        max_running: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch(&self, ctx: &StageContext) -> Result<FetchOutcome, CapabilityError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.started
                .lock()
                .unwrap()
                .push(ctx.plan.source_repo_url.clone());
            let permit = self.release.acquire().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if let Ok(permit) = permit {
                permit.forget();
            }
            std::fs::create_dir_all(&ctx.source_dir).unwrap();
            Ok(FetchOutcome::default())
        }
    }

    struct Noop;

    #[async_trait]
    impl Analyzer for Noop {
        async fn analyze(&self, _ctx: &StageContext) -> Result<AnalysisOutcome, CapabilityError> {
            Ok(AnalysisOutcome::default())
        }
    }

    #[async_trait]
    impl Transformer for Noop {
        async fn transform(
            &self,
            _ctx: &StageContext,
            _request: &TransformRequest,
        ) -> Result<TransformOutcome, CapabilityError> {
            Ok(TransformOutcome::default())
        }
    }

    #[async_trait]
    impl Verifier for Noop {
        async fn verify(
            &self,
            _ctx: &StageContext,
            _endpoints: &[ApiEndpoint],
        ) -> Result<VerifyOutcome, CapabilityError> {
            Ok(VerifyOutcome::default())
        }
    }

    #[async_trait]
    impl QualityScanner for Noop {
        async fn scan(&self, _ctx: &StageContext) -> Result<QualityReport, CapabilityError> {
            Err(CapabilityError::Permanent("not configured".into()))
        }
    }

    #[async_trait]
    impl Notifier for Noop {
        async fn notify(&self, _address: &str, _snapshot: &JobSnapshot) -> Result<(), CapabilityError> {
            Ok(())
        }
    }

    struct Fixture {
        tmp: TempDir,
        fetcher: Arc<GatedFetcher>,
        registry: JobRegistry,
    }

    fn fixture(max_concurrent_jobs: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(GatedFetcher {
            release: Semaphore::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        });
        let caps = Capabilities {
            fetcher: fetcher.clone(),
            analyzer: Arc::new(Noop),
            transformer: Arc::new(Noop),
            verifier: Arc::new(Noop),
            quality: Arc::new(Noop),
            reporter: Arc::new(FileReporter::new(tmp.path().join("artifacts"))),
            notifier: Arc::new(Noop),
        };
        let settings = RegistrySettings {
            workspace_root: tmp.path().join("work"),
            max_concurrent_jobs,
            policy: PipelinePolicy {
                clone_timeout: Duration::from_secs(30),
                ..PipelinePolicy::default()
            },
            failure_log_tail: 5,
        };
        let registry = JobRegistry::start(settings, caps, EventBus::new());
        Fixture {
            tmp,
            fetcher,
            registry,
        }
    }

    fn request(repo: &str) -> MigrationRequest {
        MigrationRequest {
            source_repo_url: format!("https://github.com/acme/{}.git", repo),
            conversion_types: vec!["java_version".into()],
            ..Default::default()
        }
    }

    async fn wait_until(what: &str, check: impl Fn() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    fn started(f: &Fixture) -> Vec<String> {
        f.fetcher.started.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_create_returns_pending_snapshot() {
        let f = fixture(1);
        let snap = f.registry.create(&request("orders")).unwrap();
        assert_eq!(snap.status, JobStatus::Pending);
        assert_eq!(snap.target_repo_name, "migration_17_orders");
        assert_eq!(f.registry.get(snap.id).unwrap().id, snap.id);
        assert_eq!(f.registry.logs(snap.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_creates_nothing() {
        let f = fixture(1);
        let bad = MigrationRequest {
            source_version: "17".into(),
            target_version: "11".into(),
            ..request("orders")
        };
        assert!(matches!(
            f.registry.create(&bad),
            Err(RegistryError::Validation(_))
        ));
        assert!(f.registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let f = fixture(1);
        let id = Uuid::new_v4();
        assert!(matches!(f.registry.get(id), Err(RegistryError::NotFound(_))));
        assert!(matches!(f.registry.cancel(id), Err(RegistryError::NotFound(_))));
        assert!(matches!(f.registry.logs(id), Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_admission_is_fifo_and_bounded() {
        let f = fixture(2);
        let ids: Vec<Uuid> = (0..4)
            .map(|i| f.registry.create(&request(&format!("repo{}", i))).unwrap().id)
            .collect();

        wait_until("two jobs to start", || started(&f).len() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(started(&f).len(), 2);
        assert!(started(&f)[0].contains("repo0"));
        assert!(started(&f)[1].contains("repo1"));
        assert_eq!(f.registry.get(ids[2]).unwrap().status, JobStatus::Pending);
        assert_eq!(f.registry.get(ids[3]).unwrap().status, JobStatus::Pending);

        f.fetcher.release.add_permits(1);
        wait_until("third job to start", || started(&f).len() == 3).await;
        assert!(started(&f)[2].contains("repo2"));

        f.fetcher.release.add_permits(10);
        wait_until("all jobs to complete", || {
            ids.iter()
                .all(|id| f.registry.get(*id).unwrap().status == JobStatus::Completed)
        })
        .await;
        assert_eq!(f.fetcher.max_running.load(Ordering::SeqCst), 2);

        let listed: Vec<Uuid> = f.registry.list().iter().map(|j| j.id).collect();
        assert_eq!(listed, ids);
    }

    /// Writes the job's repository URL into its checkout.
    struct OwnerFetcher;

    #[async_trait]
    impl Fetcher for OwnerFetcher {
        async fn fetch(&self, ctx: &StageContext) -> Result<FetchOutcome, CapabilityError> {
            std::fs::create_dir_all(&ctx.source_dir).unwrap();
            std::fs::write(ctx.source_dir.join("owner.txt"), &ctx.plan.source_repo_url).unwrap();
            Ok(FetchOutcome::default())
        }
    }

    /// Holds both jobs inside analysis at the same time, then reports one
    /// issue and one log line named after the job's repository.
    struct TaggingAnalyzer {
        both_analyzing: tokio::sync::Barrier,
        seen: Mutex<Vec<(Uuid, PathBuf, String)>>,
    }

    #[async_trait]
    impl Analyzer for TaggingAnalyzer {
        async fn analyze(&self, ctx: &StageContext) -> Result<AnalysisOutcome, CapabilityError> {
            self.both_analyzing.wait().await;
            let owner = std::fs::read_to_string(ctx.source_dir.join("owner.txt")).unwrap();
            let repo = owner
                .rsplit('/')
                .next()
                .unwrap()
                .trim_end_matches(".git")
                .to_string();
            ctx.progress.log(format!("analyzed {}", repo));
            self.seen
                .lock()
                .unwrap()
                .push((ctx.job_id, ctx.source_dir.clone(), owner));
            Ok(AnalysisOutcome {
                issues: vec![NewIssue::new(
                    IssueSeverity::Warning,
                    "Isolation",
                    format!("found in {}", repo),
                    format!("{}/App.java", repo),
                )],
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_jobs_do_not_share_state() {
        let tmp = TempDir::new().unwrap();
        let analyzer = Arc::new(TaggingAnalyzer {
            both_analyzing: tokio::sync::Barrier::new(2),
            seen: Mutex::new(Vec::new()),
        });
        let caps = Capabilities {
            fetcher: Arc::new(OwnerFetcher),
            analyzer: analyzer.clone(),
            transformer: Arc::new(Noop),
            verifier: Arc::new(Noop),
            quality: Arc::new(Noop),
            reporter: Arc::new(FileReporter::new(tmp.path().join("artifacts"))),
            notifier: Arc::new(Noop),
        };
        let settings = RegistrySettings {
            workspace_root: tmp.path().join("work"),
            max_concurrent_jobs: 2,
            ..RegistrySettings::default()
        };
        let registry = JobRegistry::start(settings, caps, EventBus::new());
        let workspaces = WorkspaceManager::new(tmp.path().join("work"));

        let alpha = registry.create(&request("alpha")).unwrap().id;
        let beta = registry.create(&request("beta")).unwrap().id;
        wait_until("both jobs to finish", || {
            [alpha, beta]
                .iter()
                .all(|id| registry.get(*id).unwrap().status.is_terminal())
        })
        .await;
        assert_eq!(registry.get(alpha).unwrap().status, JobStatus::Completed);
        assert_eq!(registry.get(beta).unwrap().status, JobStatus::Completed);

        for (own, other, id) in [("alpha", "beta", alpha), ("beta", "alpha", beta)] {
            let issues = registry.issues(id).unwrap();
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].file_path, format!("{}/App.java", own));
            assert!(!issues[0].message.contains(other));

            let logs = registry.logs(id).unwrap();
            assert!(logs.iter().any(|l| l.message == format!("analyzed {}", own)));
            assert!(logs.iter().all(|l| !l.message.contains(other)));
        }

        let seen = analyzer.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        for (id, source_dir, owner) in &seen {
            assert!(source_dir.starts_with(workspaces.path_for(*id)));
            let expected = if *id == alpha { "alpha" } else { "beta" };
            assert!(owner.ends_with(&format!("/{}.git", expected)));
        }
        let (a, b) = (workspaces.path_for(alpha), workspaces.path_for(beta));
        assert_ne!(a, b);
        assert!(!a.starts_with(&b) && !b.starts_with(&a));
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_runs() {
        let f = fixture(1);
        let first = f.registry.create(&request("first")).unwrap().id;
        let second = f.registry.create(&request("second")).unwrap().id;
        wait_until("first job to start", || started(&f).len() == 1).await;

        let snap = f.registry.cancel(second).unwrap();
        assert_eq!(snap.status, JobStatus::Cancelled);
        // Cancelling again is a no-op.
        assert_eq!(f.registry.cancel(second).unwrap().status, JobStatus::Cancelled);

        f.fetcher.release.add_permits(10);
        wait_until("first job to complete", || {
            f.registry.get(first).unwrap().status == JobStatus::Completed
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(started(&f).len(), 1);
        assert!(!f.tmp.path().join("work").join(format!("job-{}", second)).exists());
    }

    #[tokio::test]
    async fn test_artifacts_only_after_completion() {
        let f = fixture(1);
        let id = f.registry.create(&request("orders")).unwrap().id;
        wait_until("job to start", || started(&f).len() == 1).await;
        assert!(matches!(
            f.registry.artifact(id, ArtifactKind::Archive),
            Err(RegistryError::ArtifactUnavailable {
                status: JobStatus::Cloning,
                ..
            })
        ));

        f.fetcher.release.add_permits(1);
        wait_until("job to complete", || {
            f.registry.get(id).unwrap().status == JobStatus::Completed
        })
        .await;
        let path = f.registry.artifact(id, ArtifactKind::Report).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_cancel_running_job_cleans_workspace() {
        let f = fixture(1);
        let id = f.registry.create(&request("orders")).unwrap().id;
        wait_until("job to start", || started(&f).len() == 1).await;
        let workspace = f.tmp.path().join("work").join(format!("job-{}", id));
        assert!(workspace.exists());

        f.registry.cancel(id).unwrap();
        wait_until("job to be cancelled", || {
            f.registry.get(id).unwrap().status == JobStatus::Cancelled
        })
        .await;
        assert!(!workspace.exists());
        assert_eq!(f.registry.running_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_jobs_and_rejects_new_ones() {
        let f = fixture(1);
        let running = f.registry.create(&request("running")).unwrap().id;
        let queued = f.registry.create(&request("queued")).unwrap().id;
        wait_until("job to start", || started(&f).len() == 1).await;

        f.registry.shutdown().await;
        assert_eq!(f.registry.get(running).unwrap().status, JobStatus::Cancelled);
        assert_eq!(f.registry.get(queued).unwrap().status, JobStatus::Cancelled);
        assert!(matches!(
            f.registry.create(&request("late")),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(
            std::fs::read_dir(f.tmp.path().join("work"))
                .unwrap()
                .next()
                .is_none()
        );
    }
}

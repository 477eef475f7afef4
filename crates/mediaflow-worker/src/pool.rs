//! Per-kind worker pool: LISTEN/NOTIFY or polling, bounded concurrency, retry.
//!
//! Shutdown: [`WorkerPool::shutdown`] stops claiming and returns immediately. Jobs
//! already spawned keep running until they finish or hit the job timeout; a job cut
//! off by process exit stays `active` until the reaper of the next process returns it
//! to the queue, or fails it along with its media item when no attempts remain.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use mediaflow_core::models::{MediaJob, MediaKind};
use mediaflow_core::{Config, TaskError};
use mediaflow_db::{JobStore, ReapedJobs, JOB_NOTIFY_CHANNEL, STALE_JOB_ERROR};

use crate::handlers::MediaJobHandler;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    /// Interval between stale job reaper runs. Zero disables the reaper.
    pub reap_interval: Duration,
    /// Grace period added to the job timeout before an `active` job counts as stale.
    pub stale_grace: Duration,
}

impl WorkerPoolConfig {
    pub fn for_kind(config: &Config, kind: MediaKind) -> Self {
        let (concurrency, timeout_secs) = match kind {
            MediaKind::Image => (config.image_worker_concurrency, config.image_job_timeout_secs),
            MediaKind::Video => (config.video_worker_concurrency, config.video_job_timeout_secs),
        };
        Self {
            concurrency,
            poll_interval: Duration::from_millis(config.queue_poll_interval_ms),
            job_timeout: Duration::from_secs(timeout_secs),
            reap_interval: Duration::from_secs(config.stale_job_reap_interval_secs),
            stale_grace: Duration::from_secs(config.stale_job_grace_secs.max(0) as u64),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.job_timeout + self.stale_grace
    }
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { delay: Duration },
    Failed,
}

/// Runs claimed jobs of one queue through its handler and records the result.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    handler: Arc<dyn MediaJobHandler>,
    timeout: Duration,
}

impl JobRunner {
    pub fn new(jobs: Arc<dyn JobStore>, handler: Arc<dyn MediaJobHandler>, timeout: Duration) -> Self {
        Self {
            jobs,
            handler,
            timeout,
        }
    }

    pub fn queue(&self) -> &'static str {
        self.handler.kind().queue_name()
    }

    /// Claims the next due job and runs it inline. `None` when the queue is empty.
    pub async fn run_next(&self) -> Result<Option<JobOutcome>> {
        match self.jobs.claim_next(self.queue()).await? {
            Some(job) => Ok(Some(self.execute(job).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, queue = %job.queue, attempt = job.attempts_made))]
    pub async fn execute(&self, job: MediaJob) -> Result<JobOutcome> {
        let result = tokio::time::timeout(self.timeout, self.handler.handle(&job)).await;

        match result {
            Ok(Ok(())) => {
                self.jobs
                    .mark_completed(job.id)
                    .await
                    .context("Failed to mark job as completed")?;
                tracing::info!("Job completed successfully");
                Ok(JobOutcome::Completed)
            }
            Ok(Err(e)) => {
                let is_unrecoverable = TaskError::is_unrecoverable_error(&e);
                let message = format!("{:#}", e);

                tracing::error!(
                    error = %message,
                    attempts_made = job.attempts_made,
                    max_attempts = job.max_attempts,
                    unrecoverable = is_unrecoverable,
                    "Job execution failed"
                );

                if is_unrecoverable {
                    self.jobs
                        .mark_failed(job.id, &message)
                        .await
                        .context("Failed to mark job as failed")?;
                    tracing::error!("Job failed with unrecoverable error, will not retry");
                    return Ok(JobOutcome::Failed);
                }
                self.retry_or_fail(&job, &message).await
            }
            Err(_) => {
                let message = format!("Job timed out after {}s", self.timeout.as_secs());
                tracing::error!(timeout_secs = self.timeout.as_secs(), "Job execution timed out");
                self.handler.abandon(&job, &message).await;
                self.retry_or_fail(&job, &message).await
            }
        }
    }

    /// Requeues jobs left `active` longer than `stale_after`. Jobs with no attempts
    /// left are failed, and their media items are marked failed through the handler.
    pub async fn reap_stale(&self, stale_after: Duration) -> Result<ReapedJobs> {
        let reaped = self
            .jobs
            .reap_stale(self.queue(), stale_after)
            .await
            .context("Failed to reap stale jobs")?;
        for job in &reaped.exhausted {
            tracing::warn!(job_id = %job.id, attempts_made = job.attempts_made, "Stale job failed after maximum attempts");
            self.handler.abandon(job, STALE_JOB_ERROR).await;
        }
        Ok(reaped)
    }

    async fn retry_or_fail(&self, job: &MediaJob, message: &str) -> Result<JobOutcome> {
        match job.next_retry_delay() {
            Some(delay) => {
                tracing::info!(
                    next_attempt = job.attempts_made + 1,
                    backoff_ms = delay.as_millis() as u64,
                    "Scheduling job retry"
                );
                self.jobs
                    .schedule_retry(job.id, message, delay)
                    .await
                    .context("Failed to schedule job retry")?;
                Ok(JobOutcome::Retrying { delay })
            }
            None => {
                self.jobs
                    .mark_failed(job.id, message)
                    .await
                    .context("Failed to mark job as failed")?;
                tracing::warn!(
                    attempts_made = job.attempts_made,
                    "Job failed after maximum attempts"
                );
                Ok(JobOutcome::Failed)
            }
        }
    }
}

/// Consumer for one queue. Spawns its loop on construction.
pub struct WorkerPool {
    queue: &'static str,
    shutdown_tx: mpsc::Sender<()>,
}

impl WorkerPool {
    /// Starts the pool. If `pool` is `Some`, the worker also LISTENs on
    /// [`JOB_NOTIFY_CHANNEL`] and wakes as soon as a job lands on its queue; otherwise
    /// it only polls every `poll_interval`.
    pub fn start(runner: JobRunner, config: WorkerPoolConfig, pool: Option<sqlx::PgPool>) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let queue = runner.queue();

        tokio::spawn(async move {
            Self::worker_loop(runner, config, shutdown_rx, pool).await;
        });

        Self { queue, shutdown_tx }
    }

    pub fn queue(&self) -> &'static str {
        self.queue
    }

    async fn worker_loop(
        runner: JobRunner,
        config: WorkerPoolConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let queue = runner.queue();
        tracing::info!(
            queue,
            concurrency = config.concurrency,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            listen_notify = pool.is_some(),
            "Worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        // `notify_tx` lives for the whole loop so `notify_rx` never closes without a listener.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        let listener = pool.map(|pool| spawn_listener(pool, queue, notify_tx.clone()));

        let (reaper_shutdown_tx, reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if !config.reap_interval.is_zero() {
            spawn_reaper(
                runner.clone(),
                config.reap_interval,
                config.stale_after(),
                reaper_shutdown_rx,
            );
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(queue, "Worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&runner, &semaphore).await;
                }
                _ = sleep(config.poll_interval) => {
                    Self::claim_and_dispatch_one(&runner, &semaphore).await;
                }
            }
        }

        if let Some(handle) = listener {
            handle.abort();
        }
        tracing::info!(queue, "Worker pool stopped");
    }

    async fn claim_and_dispatch_one(runner: &JobRunner, semaphore: &Arc<Semaphore>) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(queue = runner.queue(), "No workers available, skipping claim");
                return;
            }
        };

        match runner.jobs.claim_next(runner.queue()).await {
            Ok(Some(job)) => {
                let runner = runner.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = runner.execute(job).await {
                        tracing::error!(error = %e, "Failed to record job outcome");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!(queue = runner.queue(), "No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(queue = runner.queue(), error = %e, "Failed to claim job from queue");
            }
        }
    }

    /// Signals the pool to stop claiming jobs. Does not wait for in-flight jobs.
    pub async fn shutdown(&self) {
        tracing::info!(queue = self.queue, "Initiating worker pool shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

fn spawn_listener(pool: sqlx::PgPool, queue: &'static str, tx: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match sqlx::postgres::PgListener::connect_with(&pool).await {
                Ok(mut listener) => {
                    if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                        tracing::warn!(error = %e, "LISTEN failed, will retry");
                        sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    while let Ok(notification) = listener.recv().await {
                        if notification.payload() == queue {
                            let _ = tx.send(()).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PgListener connect failed, will retry");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    })
}

fn spawn_reaper(
    runner: JobRunner,
    every: Duration,
    stale_after: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        let queue = runner.queue();
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = runner.reap_stale(stale_after).await {
                        tracing::error!(queue, error = %e, "Stale job reaper failed");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediaflow_core::models::{ImageJobPayload, ImageMimeType, JobStatus, RetryPolicy};
    use mediaflow_db::test_helpers::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    use crate::broker::QueueBroker;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailRecoverable,
        FailUnrecoverable,
        Hang,
    }

    struct TestHandler {
        behaviour: Behaviour,
        delay: Duration,
        running: AtomicUsize,
        max_running: AtomicUsize,
        abandoned: Mutex<Vec<String>>,
    }

    impl TestHandler {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Self::with_delay(behaviour, Duration::ZERO)
        }

        fn with_delay(behaviour: Behaviour, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                delay,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                abandoned: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MediaJobHandler for TestHandler {
        fn kind(&self) -> MediaKind {
            MediaKind::Image
        }

        async fn handle(&self, _job: &MediaJob) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::FailRecoverable => Err(anyhow::anyhow!("decoder crashed")),
                Behaviour::FailUnrecoverable => {
                    Err(TaskError::unrecoverable(anyhow::anyhow!("bad payload")).into())
                }
                Behaviour::Hang => {
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }

        async fn abandon(&self, _job: &MediaJob, reason: &str) {
            self.abandoned.lock().unwrap().push(reason.to_string());
        }
    }

    async fn enqueue_image(store: &InMemoryStore) -> MediaJob {
        QueueBroker::new(Arc::new(store.clone()), RetryPolicy::default())
            .enqueue(&ImageJobPayload {
                media_id: Uuid::new_v4(),
                file_path: "images/originals/x.png".to_string(),
                mime_type: ImageMimeType::Png,
            })
            .await
            .unwrap()
    }

    fn runner(store: &InMemoryStore, handler: Arc<TestHandler>, timeout: Duration) -> JobRunner {
        JobRunner::new(Arc::new(store.clone()), handler, timeout)
    }

    #[tokio::test]
    async fn test_recoverable_failure_backs_off_then_fails_at_cap() {
        let store = InMemoryStore::new();
        let job = enqueue_image(&store).await;
        let runner = runner(&store, TestHandler::new(Behaviour::FailRecoverable), Duration::from_secs(5));

        assert_eq!(
            runner.run_next().await.unwrap(),
            Some(JobOutcome::Retrying { delay: Duration::from_millis(3000) })
        );
        // Backoff keeps it off the queue until due.
        assert_eq!(runner.run_next().await.unwrap(), None);

        store.make_job_due(job.id);
        assert_eq!(
            runner.run_next().await.unwrap(),
            Some(JobOutcome::Retrying { delay: Duration::from_millis(6000) })
        );

        store.make_job_due(job.id);
        assert_eq!(runner.run_next().await.unwrap(), Some(JobOutcome::Failed));

        let job = store.job(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts_made, 3);
        assert!(job.last_error.unwrap().contains("decoder crashed"));
        assert_eq!(runner.run_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_is_not_retried() {
        let store = InMemoryStore::new();
        let job = enqueue_image(&store).await;
        let runner = runner(&store, TestHandler::new(Behaviour::FailUnrecoverable), Duration::from_secs(5));

        assert_eq!(runner.run_next().await.unwrap(), Some(JobOutcome::Failed));
        let job = store.job(job.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_timeout_abandons_and_retries() {
        let store = InMemoryStore::new();
        enqueue_image(&store).await;
        let handler = TestHandler::new(Behaviour::Hang);
        let runner = runner(&store, handler.clone(), Duration::from_millis(20));

        let outcome = runner.run_next().await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Retrying { .. })));
        let abandoned = handler.abandoned.lock().unwrap().clone();
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_pool_respects_concurrency_cap() {
        let store = InMemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(enqueue_image(&store).await.id);
        }
        let handler = TestHandler::with_delay(Behaviour::Succeed, Duration::from_millis(40));
        let config = WorkerPoolConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(5),
            job_timeout: Duration::from_secs(5),
            reap_interval: Duration::ZERO,
            stale_grace: Duration::ZERO,
        };
        let pool = WorkerPool::start(
            runner(&store, handler.clone(), config.job_timeout),
            config,
            None,
        );

        let mut all_done = false;
        for _ in 0..200 {
            all_done = ids
                .iter()
                .all(|id| store.job(*id).map(|j| j.status == JobStatus::Completed).unwrap_or(false));
            if all_done {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown().await;

        assert!(all_done);
        assert!(handler.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_reaper_requeues_stale_job() {
        let store = InMemoryStore::new();
        let job = enqueue_image(&store).await;
        store.claim_next("image-processing").await.unwrap();
        store.backdate_job_lock(job.id, Duration::from_secs(3600));
        let handler = TestHandler::new(Behaviour::Succeed);

        let (tx, rx) = mpsc::channel(1);
        spawn_reaper(
            runner(&store, handler.clone(), Duration::from_secs(5)),
            Duration::from_millis(10),
            Duration::from_secs(60),
            rx,
        );
        sleep(Duration::from_millis(50)).await;
        let _ = tx.send(()).await;

        assert_eq!(store.job(job.id).unwrap().status, JobStatus::Waiting);
        assert!(handler.abandoned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reaper_fails_stale_job_without_attempts_left() {
        let store = InMemoryStore::new();
        let job = enqueue_image(&store).await;
        let handler = TestHandler::new(Behaviour::FailRecoverable);
        let runner = runner(&store, handler.clone(), Duration::from_secs(5));
        for _ in 0..2 {
            runner.run_next().await.unwrap();
            store.make_job_due(job.id);
        }
        store.claim_next("image-processing").await.unwrap();
        store.backdate_job_lock(job.id, Duration::from_secs(3600));

        let reaped = runner.reap_stale(Duration::from_secs(60)).await.unwrap();

        assert_eq!(reaped.requeued, 0);
        assert_eq!(reaped.exhausted.len(), 1);
        assert_eq!(store.job(job.id).unwrap().status, JobStatus::Failed);
        assert_eq!(
            *handler.abandoned.lock().unwrap(),
            vec![STALE_JOB_ERROR.to_string()]
        );
    }

    #[test]
    fn test_config_for_kind() {
        let config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/mediaflow".to_string()),
            _ => None,
        })
        .unwrap();
        let image = WorkerPoolConfig::for_kind(&config, MediaKind::Image);
        let video = WorkerPoolConfig::for_kind(&config, MediaKind::Video);
        assert_eq!(image.concurrency, 5);
        assert_eq!(video.concurrency, 2);
        assert_eq!(video.stale_after(), Duration::from_secs(3600 + 300));
    }
}

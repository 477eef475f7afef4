//! Periodic driver for the cron stages.
//!
//! Every task ticks on its own interval, optionally after an initial delay. A tick
//! that fires while the task's previous run is still going is skipped and logged;
//! ticks missed while the runtime was busy are dropped rather than replayed.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::stages::{AiStage, EmbeddingStage};

#[async_trait]
pub trait CronJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

#[async_trait]
impl CronJob for AiStage {
    fn name(&self) -> &'static str {
        "ai-enrichment"
    }

    async fn run(&self) -> Result<()> {
        self.run_batch().await.map(|_| ())
    }
}

#[async_trait]
impl CronJob for EmbeddingStage {
    fn name(&self) -> &'static str {
        "embedding"
    }

    async fn run(&self) -> Result<()> {
        self.run_batch().await.map(|_| ())
    }
}

/// At most one run of a task at a time.
#[derive(Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of a run; releases the flight when dropped, panics included.
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ran,
    SkippedBusy,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Runs `job` unless a run is already in progress.
    pub async fn run(&self, job: &dyn CronJob) -> RunOutcome {
        let Some(_guard) = self.try_begin() else {
            return RunOutcome::SkippedBusy;
        };
        if let Err(e) = job.run().await {
            tracing::error!(task = job.name(), error = %format!("{:#}", e), "Scheduled task failed");
        }
        RunOutcome::Ran
    }
}

/// One periodic task.
pub struct ScheduledTask {
    pub job: Arc<dyn CronJob>,
    pub every: Duration,
    pub first_delay: Duration,
}

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn start(tasks: Vec<ScheduledTask>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for task in tasks {
            tokio::spawn(Self::task_loop(task, shutdown_rx.clone()));
        }
        Self { shutdown_tx }
    }

    /// AI stage every `every`, embedding stage on the same interval shifted by `stagger`.
    pub fn for_stages(
        ai: Arc<AiStage>,
        embedding: Arc<EmbeddingStage>,
        every: Duration,
        stagger: Duration,
    ) -> Self {
        Self::start(vec![
            ScheduledTask {
                job: ai,
                every,
                first_delay: Duration::ZERO,
            },
            ScheduledTask {
                job: embedding,
                every,
                first_delay: stagger,
            },
        ])
    }

    async fn task_loop(task: ScheduledTask, mut shutdown_rx: watch::Receiver<bool>) {
        let name = task.job.name();
        let flight = SingleFlight::new();
        let mut ticker = interval_at(Instant::now() + task.first_delay, task.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            task = name,
            every_secs = task.every.as_secs_f64(),
            first_delay_secs = task.first_delay.as_secs_f64(),
            "Scheduled task started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if flight.is_busy() {
                        tracing::info!(task = name, "Previous run still in progress, skipping tick");
                        continue;
                    }
                    let flight = flight.clone();
                    let job = task.job.clone();
                    tokio::spawn(async move {
                        if flight.run(job.as_ref()).await == RunOutcome::SkippedBusy {
                            tracing::info!(task = job.name(), "Previous run still in progress, skipping tick");
                        }
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(task = name, "Scheduled task stopped");
    }

    /// Stops every task from starting new runs. Runs in progress finish on their own.
    pub fn shutdown(&self) {
        tracing::info!("Initiating scheduler shutdown");
        let _ = self.shutdown_tx.send(true);
    }
}

//! Interval scheduling of sync jobs.
//!
//! Each job runs on its own tokio task. A per-job run lock rejects a run
//! while the previous one is still going, and failed runs are retried
//! within the same tick when the error is retryable.

mod retry;

pub use retry::{retry_async, RetryConfig, RetryStats};

use crate::cancel::CancellationToken;
use crate::error::{FleetError, Result};
use crate::sync::{JobContext, SyncJob, SyncReport};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One job plus its run lock and retry policy.
///
/// Clones share the lock.
#[derive(Clone)]
pub struct JobRunner {
    job: Arc<dyn SyncJob>,
    running: Arc<Mutex<()>>,
    retry: RetryConfig,
}

impl JobRunner {
    pub fn new(job: Arc<dyn SyncJob>, retry: RetryConfig) -> Self {
        Self {
            job,
            running: Arc::new(Mutex::new(())),
            retry,
        }
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Whether a run is currently holding the lock.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run the job once, retrying retryable failures.
    ///
    /// Fails with [`FleetError::RunInProgress`] without running anything when
    /// another run of the same job holds the lock.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| FleetError::RunInProgress {
                job: self.name().to_string(),
            })?;

        let fired_at = Utc::now();
        let (result, stats) = retry_async(
            &self.retry,
            cancel,
            |attempt| {
                let job = self.job.clone();
                let ctx = JobContext {
                    fired_at,
                    ..JobContext::new(cancel.clone())
                }
                .with_attempt(attempt);
                async move { job.execute(&ctx).await }
            },
            FleetError::is_retryable,
        )
        .await;

        if stats.attempts > 1 {
            debug!(
                "{}: {} attempts, {:?} spent waiting",
                self.name(),
                stats.attempts,
                stats.total_delay
            );
        }
        result
    }
}

struct ScheduledJob {
    runner: JobRunner,
    interval: Duration,
}

/// Runs registered jobs on fixed intervals until cancelled.
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    cancel: CancellationToken,
}

impl JobScheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            cancel,
        }
    }

    /// Register a job. The first run happens right away.
    pub fn add(&mut self, job: Arc<dyn SyncJob>, interval: Duration, retry: RetryConfig) {
        info!("Scheduling {} every {:?}", job.name(), interval);
        self.jobs.push(ScheduledJob {
            runner: JobRunner::new(job, retry),
            interval,
        });
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .map(|scheduled| scheduled.runner.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every job once, in registration order.
    pub async fn run_all_once(&self) -> Vec<(String, Result<SyncReport>)> {
        let mut results = Vec::with_capacity(self.jobs.len());
        for scheduled in &self.jobs {
            let name = scheduled.runner.name().to_string();
            let result = scheduled.runner.run_once(&self.cancel).await;
            if let Err(e) = &result {
                error!("{} failed: {}", name, e);
            }
            results.push((name, result));
        }
        results
    }

    /// Spawn one task per job.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let cancel = self.cancel;
        self.jobs
            .into_iter()
            .map(|scheduled| tokio::spawn(run_on_interval(scheduled, cancel.clone())))
            .collect()
    }

    /// Run until cancelled, then wait for every job task to stop.
    pub async fn run(self) {
        for handle in self.spawn() {
            if let Err(e) = handle.await {
                error!("Job task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_on_interval(scheduled: ScheduledJob, cancel: CancellationToken) {
    let ScheduledJob { runner, interval } = scheduled;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match runner.run_once(&cancel).await {
            Ok(report) => debug!("{} tick done: {}", runner.name(), report),
            Err(FleetError::Cancelled) => {
                info!("{} cancelled mid-run, nothing committed", runner.name());
                break;
            }
            Err(e @ FleetError::RunInProgress { .. }) => warn!("{}", e),
            Err(e) => error!("{} run failed: {}", runner.name(), e),
        }
    }
    debug!("{} task stopped", runner.name());
}

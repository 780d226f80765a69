//! services/api/src/queue/server.rs
//!
//! Pulls due jobs from the weighted queues and runs them on a bounded pool.
//!
//! Each attempt gets its own cancellation token, a child of the server's. The
//! token fires when the job's timeout passes or when shutdown stops waiting for
//! in-flight work. Shutdown is two-phase: stop dequeuing, then drain up to the
//! configured deadline before cancelling what is left.

use chrono::Utc;
use mindhit_core::jobs::{backoff_delay, Job, QUEUE_WEIGHTS};
use mindhit_core::ports::JobQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{JobError, JobResult, JobRouter};
use crate::config::Config;
use crate::metrics::{self, JobStatus};

/// How long a cancelled handler may keep running before it is dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    /// How often expired leases are returned to pending.
    pub lease_sweep_interval: Duration,
    pub retry_base_delay: chrono::Duration,
    pub retry_max_delay: chrono::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
            lease_sweep_interval: Duration::from_secs(60),
            retry_base_delay: chrono::Duration::seconds(10),
            retry_max_delay: chrono::Duration::hours(1),
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            poll_interval: config.worker_poll_interval,
            shutdown_timeout: config.worker_shutdown_timeout,
            ..Self::default()
        }
    }
}

/// Smooth weighted round-robin over the queue names.
#[derive(Debug)]
struct QueuePicker {
    queues: Vec<(&'static str, i64, i64)>,
}

impl QueuePicker {
    fn new(weights: &[(&'static str, u32)]) -> Self {
        Self {
            queues: weights.iter().map(|&(name, w)| (name, w as i64, 0)).collect(),
        }
    }

    /// Every queue, starting with the one whose turn it is and falling back to the
    /// rest by weight.
    fn order(&mut self) -> Vec<&'static str> {
        let total: i64 = self.queues.iter().map(|q| q.1).sum();
        for q in self.queues.iter_mut() {
            q.2 += q.1;
        }
        let Some(turn) = (0..self.queues.len()).max_by_key(|&i| (self.queues[i].2, -(i as i64)))
        else {
            return Vec::new();
        };
        self.queues[turn].2 -= total;

        let mut order = vec![self.queues[turn].0];
        let mut rest: Vec<_> = self.queues.iter().filter(|q| q.0 != order[0]).collect();
        rest.sort_by(|a, b| b.1.cmp(&a.1));
        order.extend(rest.into_iter().map(|q| q.0));
        order
    }
}

pub struct JobServer {
    queue: Arc<dyn JobQueue>,
    router: Arc<JobRouter>,
    config: ServerConfig,
}

impl JobServer {
    pub fn new(queue: Arc<dyn JobQueue>, router: JobRouter, config: ServerConfig) -> Self {
        Self {
            queue,
            router: Arc::new(router),
            config,
        }
    }

    /// Runs until `shutdown` fires, then drains in-flight jobs.
    pub async fn run(&self, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let tracker = TaskTracker::new();
        let jobs_cancel = CancellationToken::new();
        let mut picker = QueuePicker::new(&QUEUE_WEIGHTS);
        let mut last_sweep: Option<Instant> = None;

        info!(
            concurrency = self.config.concurrency,
            job_types = ?self.router.type_tags(),
            "job server started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if last_sweep.map_or(true, |at| at.elapsed() >= self.config.lease_sweep_interval) {
                self.recover_leases().await;
                last_sweep = Some(Instant::now());
            }

            match self.next_job(&mut picker).await {
                Some(job) => {
                    let queue = self.queue.clone();
                    let router = self.router.clone();
                    let config = self.config.clone();
                    let cancel = jobs_cancel.child_token();
                    tracker.spawn(async move {
                        run_job(queue.as_ref(), &router, &config, job, cancel).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        tracker.close();
        info!(in_flight = tracker.len(), "job server stopping, waiting for in-flight jobs");
        if tokio::time::timeout(self.config.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = tracker.len(),
                "shutdown deadline passed, cancelling in-flight jobs"
            );
            jobs_cancel.cancel();
            tracker.wait().await;
        }
        info!("job server stopped");
    }

    /// Runs every job that is due right now, one at a time. Returns how many
    /// attempts were made.
    pub async fn drain_due(&self) -> usize {
        let mut picker = QueuePicker::new(&QUEUE_WEIGHTS);
        let mut attempts = 0;
        while let Some(job) = self.next_job(&mut picker).await {
            run_job(
                self.queue.as_ref(),
                &self.router,
                &self.config,
                job,
                CancellationToken::new(),
            )
            .await;
            attempts += 1;
        }
        attempts
    }

    async fn next_job(&self, picker: &mut QueuePicker) -> Option<Job> {
        for queue in picker.order() {
            match self.queue.dequeue(queue).await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => continue,
                Err(e) => {
                    warn!(queue, error = %e, "failed to dequeue");
                    return None;
                }
            }
        }
        None
    }

    async fn recover_leases(&self) {
        match self.queue.requeue_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => warn!(recovered = n, "returned expired job leases to pending"),
            Err(e) => warn!(error = %e, "failed to recover expired leases"),
        }
    }
}

async fn run_job(
    queue: &dyn JobQueue,
    router: &JobRouter,
    config: &ServerConfig,
    job: Job,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let Some(handler) = router.get(&job.type_tag) else {
        let msg = format!("no handler registered for {}", job.type_tag);
        error!(job_id = %job.id, job_type = %job.type_tag, "{}", msg);
        if let Err(e) = queue.bury_job(job.id, &msg).await {
            error!(job_id = %job.id, error = %e, "failed to bury job");
        }
        metrics::observe_job(&job.type_tag, JobStatus::Dead, started.elapsed().as_secs_f64());
        return;
    };

    debug!(job_id = %job.id, job_type = %job.type_tag, attempt = job.retried + 1, "running job");
    let timeout = Duration::from_secs(job.timeout_secs.max(1) as u64);
    let work = handler.handle(&job, &cancel);
    tokio::pin!(work);
    let interrupted = tokio::select! {
        res = &mut work => Ok(res),
        _ = tokio::time::sleep(timeout) => Err(format!("timed out after {}s", timeout.as_secs())),
        _ = cancel.cancelled() => Err("cancelled by shutdown".to_string()),
    };
    let result: JobResult = match interrupted {
        Ok(result) => result,
        Err(msg) => {
            // The handler sees the token fire and gets a moment to record the abandoned call.
            cancel.cancel();
            if tokio::time::timeout(CANCEL_GRACE, &mut work).await.is_err() {
                warn!(job_id = %job.id, job_type = %job.type_tag, "handler ignored cancellation");
            }
            Err(JobError::Retryable(msg))
        }
    };
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(()) => {
            if let Err(e) = queue.complete_job(job.id).await {
                error!(job_id = %job.id, error = %e, "failed to mark job completed");
            }
            metrics::observe_job(&job.type_tag, JobStatus::Success, elapsed);
            info!(job_id = %job.id, job_type = %job.type_tag, elapsed_secs = elapsed, "job completed");
        }
        Err(JobError::Retryable(msg)) if !job.retries_exhausted() => {
            let delay = backoff_delay(job.retried, config.retry_base_delay, config.retry_max_delay);
            if let Err(e) = queue.retry_job(job.id, Utc::now() + delay, &msg).await {
                error!(job_id = %job.id, error = %e, "failed to schedule retry");
            }
            metrics::observe_job(&job.type_tag, JobStatus::Retry, elapsed);
            warn!(
                job_id = %job.id,
                job_type = %job.type_tag,
                attempt = job.retried + 1,
                max_retry = job.max_retry,
                retry_in_secs = delay.num_seconds(),
                error = %msg,
                "job failed, retrying"
            );
        }
        Err(e) => {
            let msg = e.to_string();
            if let Err(e) = queue.bury_job(job.id, &msg).await {
                error!(job_id = %job.id, error = %e, "failed to bury job");
            }
            metrics::observe_job(&job.type_tag, JobStatus::Dead, elapsed);
            error!(
                job_id = %job.id,
                job_type = %job.type_tag,
                retried = job.retried,
                error = %msg,
                "job moved to dead set"
            );
            handler.on_dead(&job, &msg).await;
        }
    }
}

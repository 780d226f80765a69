//! services/api/src/queue/scheduler.rs
//!
//! Enqueues periodic jobs on a fixed cadence.

use futures::future::join_all;
use mindhit_core::jobs::NewJob;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::JobClient;
use crate::service::build_job;

type JobFactory = Box<dyn Fn() -> Result<NewJob, serde_json::Error> + Send + Sync>;

struct PeriodicEntry {
    name: String,
    every: Duration,
    build: JobFactory,
}

pub struct Scheduler {
    client: JobClient,
    entries: Vec<PeriodicEntry>,
}

impl Scheduler {
    pub fn new(client: JobClient) -> Self {
        Self {
            client,
            entries: Vec::new(),
        }
    }

    /// Registers `build` to be enqueued every `every`, first firing one period
    /// after `run` starts.
    pub fn every<F>(mut self, name: &str, every: Duration, build: F) -> Self
    where
        F: Fn() -> Result<NewJob, serde_json::Error> + Send + Sync + 'static,
    {
        self.entries.push(PeriodicEntry {
            name: name.to_string(),
            every,
            build: Box::new(build),
        });
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let client = &self.client;
        let loops = self.entries.iter().map(|entry| {
            let shutdown = shutdown.clone();
            async move {
                let mut ticker = interval_at(Instant::now() + entry.every, entry.every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!(name = %entry.name, every_secs = entry.every.as_secs(), "periodic job registered");
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => fire(client, entry).await,
                    }
                }
            }
        });
        join_all(loops).await;
        info!("scheduler stopped");
    }
}

async fn fire(client: &JobClient, entry: &PeriodicEntry) {
    let job = match build_job((entry.build)()) {
        Ok(job) => job,
        Err(e) => {
            warn!(name = %entry.name, error = %e, "failed to build periodic job");
            return;
        }
    };
    if let Err(e) = client.enqueue(job).await {
        warn!(name = %entry.name, error = %e, "failed to enqueue periodic job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use mindhit_core::jobs::TYPE_SESSION_CLEANUP;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_period() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(JobClient::new(store.clone())).every(
            "cleanup",
            Duration::from_secs(3600),
            || NewJob::session_cleanup(24),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.jobs_of_type(TYPE_SESSION_CLEANUP).is_empty());
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(store.jobs_of_type(TYPE_SESSION_CLEANUP).len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}

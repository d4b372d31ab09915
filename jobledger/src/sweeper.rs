//! jobledger Sweeper
//!
//! The Sweeper periodically deletes completed jobs older than the retention
//! window, together with their history.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{now_millis, JobRepository, Result, Settings};

pub struct Sweeper {
    repository: Arc<dyn JobRepository>,
    interval: Duration,
    window: Duration,
}

impl Sweeper {
    pub fn new(repository: Arc<dyn JobRepository>, interval: Duration, window: Duration) -> Self {
        Self {
            repository,
            interval,
            window,
        }
    }

    pub fn from_settings(repository: Arc<dyn JobRepository>, settings: &Settings) -> Self {
        Self::new(
            repository,
            settings.retention.interval(),
            settings.retention.window(),
        )
    }

    /// Run one retention pass. Returns the number of jobs removed.
    pub async fn sweep_once(&self) -> Result<u64> {
        let window = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(window);
        self.repository.cleanup_completed_before(cutoff).await
    }

    /// Sweep on every tick until the task is aborted. Failures are logged and
    /// retried on the next tick.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!(
            "Starting sweeper every {:?} with a retention of {:?}",
            self.interval, self.window
        );

        let mut interval = pin!(tokio::time::interval(self.interval));

        loop {
            interval.tick().await;
            match self.sweep_once().await {
                Ok(removed) => info!("Swept {} completed jobs", removed),
                Err(e) => error!("Sweep failed: {}", e),
            }
        }
    }
}

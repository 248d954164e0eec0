//! Graceful pool shutdown.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::SharedResources;
use crate::worker::dispatcher::Dispatcher;
use crate::worker::pool::WorkerPool;

/// Outcome of [`ShutdownCoordinator::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub workers_joined: usize,
    /// Requests that were queued but never started.
    pub discarded: usize,
    pub completed: u64,
    pub failed: u64,
    /// Cached resources written back to storage.
    pub flushed: usize,
    pub flush_failures: usize,
}

/// Owns the pool for the process lifetime and tears it down once.
pub struct ShutdownCoordinator {
    pool: WorkerPool,
    resources: Option<Arc<SharedResources>>,
}

impl ShutdownCoordinator {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            resources: None,
        }
    }

    /// Flush these resources once the workers have stopped.
    pub fn with_resources(mut self, resources: Arc<SharedResources>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.pool.dispatcher()
    }

    /// Stop every worker, discard queued requests and persist dirty caches.
    ///
    /// Blocks until in-flight handlers return; nothing is preempted.
    pub fn shutdown(mut self) -> ShutdownReport {
        info!(workers = self.pool.len(), "Shutting down worker pool");

        self.pool.close();
        let workers_joined = self.pool.join();
        let discarded = self.pool.discard_queued();
        if discarded > 0 {
            warn!(discarded, "Discarded queued requests at shutdown");
        }

        let stats = self.pool.stats();
        let mut report = ShutdownReport {
            workers_joined,
            discarded,
            completed: stats.completed,
            failed: stats.failed,
            ..Default::default()
        };

        if let Some(resources) = &self.resources {
            let flush = resources.flush_unsaved();
            report.flushed = flush.flushed.len();
            report.flush_failures = flush.failures.len();
        }

        info!(
            workers_joined = report.workers_joined,
            discarded = report.discarded,
            completed = report.completed,
            failed = report.failed,
            flushed = report.flushed,
            flush_failures = report.flush_failures,
            "Shutdown complete"
        );
        report
    }

    /// Wait for Ctrl-C, then run [`shutdown`](Self::shutdown) on a blocking
    /// thread.
    pub async fn wait_for_signal(self) -> std::io::Result<ShutdownReport> {
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
        let report = tokio::task::spawn_blocking(move || self.shutdown()).await?;
        Ok(report)
    }
}

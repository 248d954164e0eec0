//! Worker pool: spawns one OS thread per configured worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{error, info};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::worker::affinity::{Affinity, AffinityRegistry};
use crate::worker::dispatcher::{Dispatcher, PoolShared};
use crate::worker::queue::WorkQueueTable;
use crate::worker::registry::HandlerRegistry;
use crate::worker::state::{StateCell, WorkerState};
use crate::worker::stats::PoolStatsSnapshot;
use crate::worker::worker::Worker;
use crate::worker::WorkerId;

/// Observable view of one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// `*` for a generalist, otherwise the comma-separated kinds.
    pub affinity: String,
    pub state: WorkerState,
    /// Wake notifications delivered to this worker so far.
    pub notifications: u64,
}

struct WorkerSlot {
    id: WorkerId,
    state: Arc<StateCell>,
    thread: Option<JoinHandle<()>>,
}

/// A running pool of workers sharing one queue table.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<WorkerSlot>,
}

impl WorkerPool {
    /// Validate `config` against the registered handlers and start every
    /// worker. Dedicated workers get the lowest ids, then the generalists.
    pub fn start(config: &PoolConfig, handlers: HandlerRegistry) -> Result<Self, PoolError> {
        let declared = handlers.declared_kinds();
        config.validate(&declared)?;

        let affinities = config.worker_affinities();
        let mut registry = AffinityRegistry::new();
        let mut pending = Vec::with_capacity(affinities.len());
        for (index, affinity) in affinities.into_iter().enumerate() {
            let id = WorkerId(index);
            let eligible = affinity.eligible_kinds(&declared);
            let signal = registry.register(id, affinity);
            pending.push((id, eligible, signal));
        }

        let shared = Arc::new(PoolShared::new(WorkQueueTable::new(declared), registry));
        let handlers = Arc::new(handlers);
        let mut pool = Self {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(pending.len()),
        };

        for (id, eligible, signal) in pending {
            let state = Arc::new(StateCell::new(WorkerState::Idle));
            let worker = Worker::new(
                id,
                eligible,
                signal,
                Arc::clone(&shared),
                Arc::clone(&handlers),
                Arc::clone(&state),
            );
            let spawned = thread::Builder::new()
                .name(format!("task-worker-{}", id.0))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => pool.workers.push(WorkerSlot {
                    id,
                    state,
                    thread: Some(handle),
                }),
                Err(source) => {
                    error!(worker = %id, error = %source, "Failed to spawn worker thread");
                    pool.close();
                    pool.join();
                    return Err(PoolError::Spawn {
                        index: id.0,
                        source,
                    });
                }
            }
        }

        info!(
            workers = pool.workers.len(),
            generalists = config.generalists(),
            kinds = ?shared.queues.declared(),
            "Worker pool started"
        );
        Ok(pool)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.shared))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.workers
            .iter()
            .map(|slot| WorkerInfo {
                id: slot.id,
                affinity: self
                    .shared
                    .affinities
                    .affinity(slot.id)
                    .map(Affinity::to_string)
                    .unwrap_or_default(),
                state: slot.state.get(),
                notifications: self.shared.affinities.notifications(slot.id).unwrap_or(0),
            })
            .collect()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    /// Raise the closing flag and wake every worker.
    pub(crate) fn close(&self) {
        self.shared.close();
    }

    /// Block until every worker thread has exited. Returns how many were
    /// joined by this call.
    pub(crate) fn join(&mut self) -> usize {
        let mut joined = 0;
        for slot in &mut self.workers {
            if let Some(handle) = slot.thread.take() {
                if handle.join().is_err() {
                    error!(worker = %slot.id, "Worker thread panicked outside a handler");
                }
                joined += 1;
            }
        }
        joined
    }

    /// Drop every request still queued. Returns the count discarded.
    pub(crate) fn discard_queued(&self) -> usize {
        let discarded = self.shared.queues.drain_all();
        let count = discarded.len();
        self.shared.stats.record_discarded(count);
        count
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.workers.iter().any(|slot| slot.thread.is_some()) {
            self.close();
            self.join();
        }
    }
}

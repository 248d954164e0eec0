//! Dispatch and worker-pool core.
//!
//! Requests flow from the front ends into the [`Dispatcher`], which appends
//! them to the per-kind FIFO in the [`WorkQueueTable`] and wakes every
//! eligible worker. Each worker runs its scheduling loop on a dedicated OS
//! thread and executes handlers from the [`HandlerRegistry`] to completion.
//! The [`ShutdownCoordinator`] stops the pool and flushes shared resources.

pub mod affinity;
pub mod dispatcher;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod stats;
#[allow(clippy::module_inception)]
pub mod worker;

use std::fmt;

use serde::Serialize;

pub use affinity::{Affinity, AffinityRegistry, WakeSignal};
pub use dispatcher::Dispatcher;
pub use pool::{WorkerInfo, WorkerPool};
pub use queue::{PushError, WorkQueueTable};
pub use registry::{HandlerRegistry, TaskHandler};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use state::WorkerState;
pub use stats::{PoolStats, PoolStatsSnapshot};

/// Index of a worker within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

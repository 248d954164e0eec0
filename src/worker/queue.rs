//! Per-kind FIFO queues behind one table lock.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::task::{TaskKind, TaskRequest};

/// Why a push was refused. Either way the request is handed back.
#[derive(Debug)]
pub enum PushError {
    /// No queue exists for the request's kind.
    Undeclared(TaskRequest),
    /// The table was closed for shutdown.
    Closed(TaskRequest),
}

impl PushError {
    pub fn into_request(self) -> TaskRequest {
        match self {
            PushError::Undeclared(request) | PushError::Closed(request) => request,
        }
    }
}

#[derive(Debug)]
struct TableState {
    closed: bool,
    queues: HashMap<TaskKind, VecDeque<TaskRequest>>,
}

/// One FIFO queue per declared kind.
///
/// All queues share a single lock; every critical section is an O(1)
/// push or pop (plus a scan over at most [`TaskKind::ALL`] queue heads).
/// The closed bit lives under the same lock, so once [`close`] returns no
/// later push can land behind a [`drain_all`].
///
/// [`close`]: WorkQueueTable::close
/// [`drain_all`]: WorkQueueTable::drain_all
#[derive(Debug)]
pub struct WorkQueueTable {
    /// Declared kinds in scan order. Fixed at construction.
    declared: Vec<TaskKind>,
    state: Mutex<TableState>,
}

impl WorkQueueTable {
    /// Create empty queues for `kinds`, kept in [`TaskKind::ALL`] order.
    pub fn new(kinds: impl IntoIterator<Item = TaskKind>) -> Self {
        let mut declared: Vec<TaskKind> = kinds.into_iter().collect();
        declared.sort();
        declared.dedup();
        let queues = declared.iter().map(|kind| (*kind, VecDeque::new())).collect();
        Self {
            declared,
            state: Mutex::new(TableState {
                closed: false,
                queues,
            }),
        }
    }

    pub fn declared(&self) -> &[TaskKind] {
        &self.declared
    }

    pub fn is_declared(&self, kind: TaskKind) -> bool {
        self.declared.contains(&kind)
    }

    /// Append to the tail of the request's queue. Hands the request back if
    /// its kind was never declared or the table is closed.
    pub fn push(&self, request: TaskRequest) -> Result<(), PushError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PushError::Closed(request));
        }
        match state.queues.get_mut(&request.kind()) {
            Some(queue) => {
                queue.push_back(request);
                Ok(())
            }
            None => Err(PushError::Undeclared(request)),
        }
    }

    /// Refuse every later push. Queued requests stay until drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Pop the oldest request of the first non-empty queue among `kinds`,
    /// scanned in the order given.
    pub fn pop_first(&self, kinds: &[TaskKind]) -> Option<TaskRequest> {
        let mut state = self.state.lock();
        kinds
            .iter()
            .find_map(|kind| state.queues.get_mut(kind).and_then(VecDeque::pop_front))
    }

    /// Whether any of `kinds` still holds queued work.
    pub fn has_pending(&self, kinds: &[TaskKind]) -> bool {
        let state = self.state.lock();
        kinds
            .iter()
            .any(|kind| state.queues.get(kind).is_some_and(|queue| !queue.is_empty()))
    }

    pub fn len(&self, kind: TaskKind) -> usize {
        self.state.lock().queues.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn total_len(&self) -> usize {
        self.state.lock().queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Discard every queued request, returning them in kind order.
    pub fn drain_all(&self) -> Vec<TaskRequest> {
        let mut state = self.state.lock();
        let mut drained = Vec::new();
        for kind in &self.declared {
            if let Some(queue) = state.queues.get_mut(kind) {
                drained.extend(queue.drain(..));
            }
        }
        drained
    }
}

//! Worker scheduling state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// State of one worker's scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Parked on the worker's wake signal.
    Idle,
    /// Scanning eligible queues for the oldest request.
    Selecting,
    /// Running a handler to completion.
    Executing,
    /// Checking for more eligible work before parking again.
    Draining,
    /// Loop exited; the thread is finishing.
    Terminated,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Idle, Selecting) | (Idle, Terminated) |
            (Selecting, Executing) | (Selecting, Idle) | (Selecting, Terminated) |
            (Executing, Draining) |
            (Draining, Selecting) | (Draining, Idle) | (Draining, Terminated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Selecting => 1,
            Self::Executing => 2,
            Self::Draining => 3,
            Self::Terminated => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Selecting,
            2 => Self::Executing,
            3 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::Executing => "executing",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Lock-free cell publishing a worker's current state to observers.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

//! Worker affinity and the wake protocol.
//!
//! Each worker owns a private [`WakeSignal`]. When a request of kind `K` is
//! queued, every worker eligible for `K` is signalled: generalists (empty
//! affinity) and workers whose affinity names `K`. Which of them wins the pop
//! is left to the scheduler; losers find nothing and park again.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::task::TaskKind;
use crate::worker::WorkerId;

/// Set of kinds a worker may service. Empty means any kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affinity(BTreeSet<TaskKind>);

impl Affinity {
    /// A generalist worker.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn only(kinds: impl IntoIterator<Item = TaskKind>) -> Self {
        Self(kinds.into_iter().collect())
    }

    pub fn is_generalist(&self) -> bool {
        self.0.is_empty()
    }

    pub fn allows(&self, kind: TaskKind) -> bool {
        self.0.is_empty() || self.0.contains(&kind)
    }

    /// Kinds this worker scans, in the table's declared order.
    pub fn eligible_kinds(&self, declared: &[TaskKind]) -> Vec<TaskKind> {
        declared
            .iter()
            .copied()
            .filter(|kind| self.allows(*kind))
            .collect()
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("*");
        }
        let kinds: Vec<&str> = self.0.iter().map(TaskKind::as_str).collect();
        f.write_str(&kinds.join(","))
    }
}

/// A worker's private wait/notify primitive.
///
/// A notification delivered while the worker is busy is remembered, so the
/// next wait returns immediately instead of losing the wakeup.
#[derive(Debug, Default)]
pub struct WakeSignal {
    pending: Mutex<bool>,
    cvar: Condvar,
    notifications: AtomicU64,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.cvar.notify_one();
    }

    /// Block until notified or until `closing` is set. Consumes the
    /// pending notification.
    pub fn wait(&self, closing: &AtomicBool) {
        let mut pending = self.pending.lock();
        while !*pending && !closing.load(Ordering::Acquire) {
            self.cvar.wait(&mut pending);
        }
        *pending = false;
    }

    /// Number of notifications delivered so far.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

/// One registered worker slot.
#[derive(Debug)]
struct Slot {
    id: WorkerId,
    affinity: Affinity,
    signal: Arc<WakeSignal>,
}

/// Per-worker affinity declarations plus their wake signals.
#[derive(Debug, Default)]
pub struct AffinityRegistry {
    slots: Vec<Slot>,
}

impl AffinityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker and return the signal it should wait on.
    pub fn register(&mut self, id: WorkerId, affinity: Affinity) -> Arc<WakeSignal> {
        let signal = Arc::new(WakeSignal::new());
        self.slots.push(Slot {
            id,
            affinity,
            signal: Arc::clone(&signal),
        });
        signal
    }

    /// Signal every worker eligible for `kind`. Returns how many were woken.
    pub fn wake_eligible(&self, kind: TaskKind) -> usize {
        let mut woken = 0;
        for slot in self.slots.iter().filter(|s| s.affinity.allows(kind)) {
            slot.signal.notify();
            woken += 1;
        }
        woken
    }

    /// Signal every worker regardless of affinity (shutdown).
    pub fn wake_all(&self) {
        for slot in &self.slots {
            slot.signal.notify();
        }
    }

    /// Whether at least one worker can service `kind`.
    pub fn has_eligible(&self, kind: TaskKind) -> bool {
        self.slots.iter().any(|s| s.affinity.allows(kind))
    }

    pub fn affinity(&self, id: WorkerId) -> Option<&Affinity> {
        self.slots.iter().find(|s| s.id == id).map(|s| &s.affinity)
    }

    pub fn notifications(&self, id: WorkerId) -> Option<u64> {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.signal.notifications())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn empty_affinity_allows_everything() {
        let any = Affinity::any();
        assert!(any.is_generalist());
        assert!(TaskKind::ALL.iter().all(|k| any.allows(*k)));
    }

    #[test]
    fn eligible_kinds_keep_declared_order() {
        let affinity = Affinity::only([TaskKind::AddMessages, TaskKind::Search]);
        let declared = [TaskKind::Search, TaskKind::BubbleImport, TaskKind::AddMessages];
        assert_eq!(
            affinity.eligible_kinds(&declared),
            vec![TaskKind::Search, TaskKind::AddMessages]
        );
        assert_eq!(affinity.to_string(), "search,add_messages");
    }

    #[test]
    fn wake_reaches_generalists_and_matching_specialists_only() {
        let mut registry = AffinityRegistry::new();
        registry.register(WorkerId(0), Affinity::only([TaskKind::BubbleImport]));
        registry.register(WorkerId(1), Affinity::any());
        registry.register(WorkerId(2), Affinity::only([TaskKind::Search]));

        assert_eq!(registry.wake_eligible(TaskKind::Search), 2);
        assert_eq!(registry.notifications(WorkerId(0)), Some(0));
        assert_eq!(registry.notifications(WorkerId(1)), Some(1));
        assert_eq!(registry.notifications(WorkerId(2)), Some(1));
    }

    #[test]
    fn notification_before_wait_is_not_lost() {
        let signal = WakeSignal::new();
        let closing = AtomicBool::new(false);
        signal.notify();
        // Returns immediately because the notification is pending.
        signal.wait(&closing);
        assert_eq!(signal.notifications(), 1);
    }

    #[test]
    fn wait_returns_on_notify_from_other_thread() {
        let signal = Arc::new(WakeSignal::new());
        let closing = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let closing = Arc::clone(&closing);
            thread::spawn(move || signal.wait(&closing))
        };

        thread::sleep(Duration::from_millis(20));
        signal.notify();
        waiter.join().unwrap();
    }
}

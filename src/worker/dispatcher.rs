//! Request intake: validate, enqueue, wake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::task::{TaskKind, TaskRequest};
use crate::worker::affinity::AffinityRegistry;
use crate::worker::queue::{PushError, WorkQueueTable};
use crate::worker::stats::PoolStats;

/// State shared by the dispatcher, every worker and shutdown.
#[derive(Debug)]
pub(crate) struct PoolShared {
    pub(crate) queues: WorkQueueTable,
    pub(crate) affinities: AffinityRegistry,
    pub(crate) closing: AtomicBool,
    pub(crate) stats: PoolStats,
}

impl PoolShared {
    pub(crate) fn new(queues: WorkQueueTable, affinities: AffinityRegistry) -> Self {
        Self {
            queues,
            affinities,
            closing: AtomicBool::new(false),
            stats: PoolStats::default(),
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Close the queue table, raise the closing flag and wake every worker
    /// so it can observe it.
    pub(crate) fn close(&self) {
        self.queues.close();
        self.closing.store(true, Ordering::Release);
        self.affinities.wake_all();
    }
}

/// Cheap, cloneable entry point used by the front ends.
///
/// Enqueueing never waits on handler execution: the only lock taken is the
/// queue table's, for one push.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<PoolShared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<PoolShared>) -> Self {
        Self { shared }
    }

    /// Queue `request` under `kind` and wake every eligible worker.
    ///
    /// Undeclared kinds, payloads that do not match `kind`, and submissions
    /// made after shutdown started are dropped and logged.
    pub fn submit(&self, kind: TaskKind, request: TaskRequest) {
        if !self.shared.queues.is_declared(kind) {
            debug!(kind = %kind, client_id = %request.client_id(), "Dropping request for undeclared kind");
            self.shared.stats.record_dropped();
            return;
        }
        if request.kind() != kind {
            warn!(
                kind = %kind,
                payload = %request.kind(),
                request_id = %request.id(),
                "Dropping request whose payload does not match its kind"
            );
            self.shared.stats.record_dropped();
            return;
        }

        let request_id = request.id();
        match self.shared.queues.push(request) {
            Ok(()) => {}
            Err(PushError::Closed(_)) => {
                debug!(kind = %kind, request_id = %request_id, "Pool is closing, dropping request");
                self.shared.stats.record_dropped();
                return;
            }
            Err(PushError::Undeclared(_)) => {
                // Unreachable for declared kinds.
                debug!(kind = %kind, request_id = %request_id, "No queue for kind");
                self.shared.stats.record_dropped();
                return;
            }
        }
        self.shared.stats.record_submitted();

        let woken = self.shared.affinities.wake_eligible(kind);
        debug!(kind = %kind, request_id = %request_id, woken, "Request queued");
    }

    /// Queue a request under its payload's own kind.
    pub fn submit_request(&self, request: TaskRequest) {
        self.submit(request.kind(), request);
    }

    /// Queue a request under a wire tag. Unknown tags are dropped.
    pub fn submit_named(&self, tag: &str, request: TaskRequest) {
        match tag.parse::<TaskKind>() {
            Ok(kind) => self.submit(kind, request),
            Err(e) => {
                debug!(tag, error = %e, client_id = %request.client_id(), "Dropping request for unknown kind");
                self.shared.stats.record_dropped();
            }
        }
    }

    /// Requests of `kind` waiting for a worker.
    pub fn queued(&self, kind: TaskKind) -> usize {
        self.shared.queues.len(kind)
    }

    pub fn declared_kinds(&self) -> &[TaskKind] {
        self.shared.queues.declared()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ClientHandle;
    use crate::task::{ConversationCutRequest, SearchRequest, SearchSettings};
    use crate::worker::{Affinity, WorkerId};

    fn shared_with(kinds: &[TaskKind], affinities: &[Affinity]) -> Arc<PoolShared> {
        let mut registry = AffinityRegistry::new();
        for (i, affinity) in affinities.iter().enumerate() {
            registry.register(WorkerId(i), affinity.clone());
        }
        Arc::new(PoolShared::new(
            WorkQueueTable::new(kinds.iter().copied()),
            registry,
        ))
    }

    fn cut_request() -> TaskRequest {
        let (client, _rx) = ClientHandle::new("c");
        TaskRequest::new(
            client,
            ConversationCutRequest {
                dataset: "demo".into(),
                bubble_id: "b".into(),
            },
        )
    }

    fn search_request() -> TaskRequest {
        let (client, _rx) = ClientHandle::new("c");
        TaskRequest::new(
            client,
            SearchRequest {
                query: "q".into(),
                user_id: "u".into(),
                settings: SearchSettings::default(),
                engine: "default".into(),
                dataset: "demo".into(),
                origin_message_id: None,
                origin_bubble_id: None,
            },
        )
    }

    #[test]
    fn submit_queues_and_wakes_eligible_workers() {
        let shared = shared_with(
            &[TaskKind::Search, TaskKind::ConversationCut],
            &[Affinity::any(), Affinity::only([TaskKind::Search])],
        );
        let dispatcher = Dispatcher::new(Arc::clone(&shared));

        dispatcher.submit(TaskKind::ConversationCut, cut_request());

        assert_eq!(dispatcher.queued(TaskKind::ConversationCut), 1);
        assert_eq!(shared.affinities.notifications(WorkerId(0)), Some(1));
        assert_eq!(shared.affinities.notifications(WorkerId(1)), Some(0));
        assert_eq!(shared.stats.snapshot().submitted, 1);
    }

    #[test]
    fn undeclared_kind_is_a_no_op() {
        let shared = shared_with(&[TaskKind::Search], &[Affinity::any()]);
        let dispatcher = Dispatcher::new(Arc::clone(&shared));

        dispatcher.submit(TaskKind::ConversationCut, cut_request());
        dispatcher.submit_named("bogus", search_request());

        assert!(shared.queues.is_empty());
        assert_eq!(shared.affinities.notifications(WorkerId(0)), Some(0));
        assert_eq!(shared.stats.snapshot().dropped, 2);
    }

    #[test]
    fn mismatched_payload_is_dropped() {
        let shared = shared_with(
            &[TaskKind::Search, TaskKind::ConversationCut],
            &[Affinity::any()],
        );
        let dispatcher = Dispatcher::new(Arc::clone(&shared));

        dispatcher.submit(TaskKind::Search, cut_request());

        assert!(shared.queues.is_empty());
        assert_eq!(shared.affinities.notifications(WorkerId(0)), Some(0));
    }

    #[test]
    fn submissions_after_close_are_dropped() {
        let shared = shared_with(&[TaskKind::Search], &[Affinity::any()]);
        let dispatcher = Dispatcher::new(Arc::clone(&shared));
        shared.close();
        assert!(dispatcher.is_closing());

        dispatcher.submit_request(search_request());
        assert_eq!(dispatcher.queued(TaskKind::Search), 0);
        assert_eq!(shared.stats.snapshot().dropped, 1);
        assert_eq!(shared.stats.snapshot().submitted, 0);
    }

    #[test]
    fn racing_submitters_never_land_behind_the_final_drain() {
        let shared = shared_with(&[TaskKind::Search], &[Affinity::any()]);
        let dispatcher = Dispatcher::new(Arc::clone(&shared));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        dispatcher.submit_request(search_request());
                    }
                })
            })
            .collect();
        std::thread::sleep(std::time::Duration::from_millis(1));
        shared.close();
        let drained = shared.queues.drain_all().len();
        for submitter in submitters {
            submitter.join().unwrap();
        }

        // Whatever was accepted was drained, the rest was dropped.
        assert!(shared.queues.is_empty());
        let snapshot = shared.stats.snapshot();
        assert_eq!(snapshot.submitted as usize, drained);
        assert_eq!(snapshot.submitted + snapshot.dropped, 800);
    }

    #[test]
    fn submit_named_parses_wire_tags() {
        let shared = shared_with(&[TaskKind::Search], &[Affinity::any()]);
        let dispatcher = Dispatcher::new(shared);
        dispatcher.submit_named("search", search_request());
        assert_eq!(dispatcher.queued(TaskKind::Search), 1);
    }
}

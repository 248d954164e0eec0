//! The per-thread scheduling loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::channels::OutboundMessage;
use crate::error::HandlerError;
use crate::task::{TaskKind, TaskRequest};
use crate::worker::WorkerId;
use crate::worker::affinity::WakeSignal;
use crate::worker::dispatcher::PoolShared;
use crate::worker::registry::HandlerRegistry;
use crate::worker::state::{StateCell, WorkerState};

/// One worker of the pool. Consumed by [`Worker::run`] on its own thread.
pub struct Worker {
    id: WorkerId,
    /// Kinds this worker scans, in declared order.
    eligible: Vec<TaskKind>,
    signal: Arc<WakeSignal>,
    shared: Arc<PoolShared>,
    handlers: Arc<HandlerRegistry>,
    state: Arc<StateCell>,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        eligible: Vec<TaskKind>,
        signal: Arc<WakeSignal>,
        shared: Arc<PoolShared>,
        handlers: Arc<HandlerRegistry>,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            id,
            eligible,
            signal,
            shared,
            handlers,
            state,
        }
    }

    /// Run the scheduling loop until the pool closes.
    ///
    /// Idle → Selecting → Executing → Draining, then back to Selecting while
    /// eligible work remains, or to Idle otherwise. The closing flag is
    /// checked on every wake and between requests, never during one.
    pub fn run(self) {
        info!(worker = %self.id, kinds = ?self.eligible, "Worker started");

        'idle: loop {
            self.signal.wait(&self.shared.closing);
            if self.shared.is_closing() {
                break 'idle;
            }
            self.transition(WorkerState::Selecting);

            loop {
                if self.shared.is_closing() {
                    break 'idle;
                }
                let Some(request) = self.shared.queues.pop_first(&self.eligible) else {
                    // Lost the race or woken spuriously.
                    self.transition(WorkerState::Idle);
                    continue 'idle;
                };
                self.shared.stats.record_popped();

                self.transition(WorkerState::Executing);
                self.execute(request);
                self.transition(WorkerState::Draining);

                if self.shared.is_closing() {
                    break 'idle;
                }
                if !self.shared.queues.has_pending(&self.eligible) {
                    self.transition(WorkerState::Idle);
                    continue 'idle;
                }
                self.transition(WorkerState::Selecting);
            }
        }

        self.transition(WorkerState::Terminated);
        info!(worker = %self.id, "Worker stopped");
    }

    /// Invoke the handler for `request`, containing any error or panic.
    fn execute(&self, request: TaskRequest) {
        let kind = request.kind();
        let started = Instant::now();
        debug!(worker = %self.id, kind = %kind, request_id = %request.id(), "Executing request");

        let outcome = match self.handlers.get(kind) {
            Some(handler) => {
                panic::catch_unwind(AssertUnwindSafe(|| handler.handle(self.id, &request)))
                    .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
            }
            None => Err(HandlerError::NotRegistered(kind)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                self.shared.stats.record_completed();
                debug!(worker = %self.id, kind = %kind, request_id = %request.id(), elapsed_ms, "Request completed");
            }
            Err(e) => {
                error!(
                    worker = %self.id,
                    kind = %kind,
                    request_id = %request.id(),
                    client_id = %request.client_id(),
                    elapsed_ms,
                    error = %e,
                    "Request failed"
                );
                request.client().send(OutboundMessage::TaskFailed {
                    kind,
                    request_id: request.id(),
                    error: e.to_string(),
                });
                self.shared.stats.record_failed();
            }
        }
    }

    fn transition(&self, next: WorkerState) {
        let current = self.state.get();
        debug_assert!(
            current.can_transition_to(next),
            "invalid worker transition {current} -> {next}"
        );
        self.state.set(next);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ClientHandle;
    use crate::task::ConversationCutRequest;
    use crate::worker::affinity::AffinityRegistry;
    use crate::worker::queue::WorkQueueTable;
    use crate::worker::Affinity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn cut_request(client: ClientHandle) -> TaskRequest {
        TaskRequest::new(
            client,
            ConversationCutRequest {
                dataset: "demo".into(),
                bubble_id: "b".into(),
            },
        )
    }

    fn single_worker(handlers: HandlerRegistry) -> (Arc<PoolShared>, Worker, Arc<StateCell>) {
        let mut affinities = AffinityRegistry::new();
        let signal = affinities.register(WorkerId(0), Affinity::any());
        let queues = WorkQueueTable::new(handlers.declared_kinds());
        let shared = Arc::new(PoolShared::new(queues, affinities));
        let state = Arc::new(StateCell::new(WorkerState::Idle));
        let worker = Worker::new(
            WorkerId(0),
            shared.queues.declared().to_vec(),
            signal,
            Arc::clone(&shared),
            Arc::new(handlers),
            Arc::clone(&state),
        );
        (shared, worker, state)
    }

    #[test]
    fn panic_message_extracts_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn worker_drains_queue_then_terminates_on_close() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        {
            let calls = Arc::clone(&calls);
            handlers.register_fn(TaskKind::ConversationCut, move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let (shared, worker, state) = single_worker(handlers);

        let (client, _rx) = ClientHandle::new("c");
        for _ in 0..3 {
            shared.queues.push(cut_request(client.clone())).unwrap();
        }
        shared.affinities.wake_all();

        let thread = thread::spawn(move || worker.run());
        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        shared.close();
        thread.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.get(), WorkerState::Terminated);
        assert_eq!(shared.stats.snapshot().completed, 3);
    }

    #[test]
    fn failing_handler_notifies_client_and_worker_survives() {
        let mut handlers = HandlerRegistry::new();
        handlers.register_fn(TaskKind::ConversationCut, |_, _| panic!("kaboom"));
        let (shared, worker, _state) = single_worker(handlers);

        let (client, mut rx) = ClientHandle::new("c");
        let request = cut_request(client.clone());
        let request_id = request.id();
        shared.queues.push(request).unwrap();
        shared.queues.push(cut_request(client)).unwrap();
        shared.affinities.wake_all();

        let thread = thread::spawn(move || worker.run());
        for _ in 0..200 {
            if shared.stats.snapshot().failed == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        shared.close();
        thread.join().unwrap();

        match rx.try_recv().unwrap() {
            OutboundMessage::TaskFailed { kind, request_id: id, error } => {
                assert_eq!(kind, TaskKind::ConversationCut);
                assert_eq!(id, request_id);
                assert!(error.contains("kaboom"));
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(shared.stats.snapshot().failed, 2);
    }
}

//! Handler registry: task kind → handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::task::{TaskKind, TaskRequest};
use crate::worker::WorkerId;

/// Kind-specific logic run by a worker thread.
///
/// Handlers run synchronously to completion and push any client-visible
/// output through [`TaskRequest::client`]. An `Err` is reported to the
/// client by the worker as a `task_failed` message.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError>;
}

/// Adapter so plain closures can be registered.
struct FnHandler<F>(F);

impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(WorkerId, &TaskRequest) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        (self.0)(worker, request)
    }
}

/// Registry of handlers. The set of registered kinds is the set of kinds a
/// pool declares.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::debug!(kind = %kind, "Replaced task handler");
        } else {
            tracing::debug!(kind = %kind, "Registered task handler");
        }
    }

    /// Register a closure as the handler for `kind`.
    pub fn register_fn<F>(&mut self, kind: TaskKind, handler: F)
    where
        F: Fn(WorkerId, &TaskRequest) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(FnHandler(handler)));
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn has(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in scan order.
    pub fn declared_kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ClientHandle;
    use crate::task::ConversationCutRequest;

    #[test]
    fn declared_kinds_follow_scan_order() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(TaskKind::AddMessages, |_, _| Ok(()));
        registry.register_fn(TaskKind::Search, |_, _| Ok(()));
        assert_eq!(
            registry.declared_kinds(),
            vec![TaskKind::Search, TaskKind::AddMessages]
        );
        assert!(!registry.has(TaskKind::BubbleImport));
    }

    #[test]
    fn closure_handler_is_invoked() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(TaskKind::ConversationCut, |worker, request| {
            assert_eq!(worker, WorkerId(3));
            assert_eq!(request.kind(), TaskKind::ConversationCut);
            Err(HandlerError::Panicked("expected".into()))
        });

        let (client, _rx) = ClientHandle::new("c");
        let request = TaskRequest::new(
            client,
            ConversationCutRequest {
                dataset: "d".into(),
                bubble_id: "b".into(),
            },
        );
        let handler = registry.get(TaskKind::ConversationCut).unwrap();
        assert!(handler.handle(WorkerId(3), &request).is_err());
    }
}

//! Kind-specific task handlers.
//!
//! Each handler unpacks its payload, pulls what it needs from
//! [`SharedResources`] and reports to the client. Resource failures become
//! a kind-specific cancellation message; anything else is returned as a
//! [`HandlerError`] and reported by the worker.

pub mod benchmark;
pub mod conversation;
pub mod import;
pub mod search;

use std::sync::Arc;

use crate::cache::SharedResources;
use crate::error::HandlerError;
use crate::task::{TaskKind, TaskRequest};
use crate::worker::HandlerRegistry;

pub use benchmark::{BenchmarkTestHandler, HyperParamHandler};
pub use conversation::ConversationCutHandler;
pub use import::{AddMessagesHandler, BubbleImportHandler};
pub use search::SearchHandler;

/// Knobs the handlers read that are not part of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Conversation engine used for conversation cuts.
    pub conversation_engine: String,
    /// Embedding store warmed when messages are imported.
    pub import_embedding_model: String,
    /// Language imported messages are translated to.
    pub import_language: String,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            conversation_engine: "default".to_string(),
            import_embedding_model: "hashing-256".to_string(),
            import_language: "en".to_string(),
        }
    }
}

/// Register a handler for every task kind.
pub fn register_default_handlers(
    registry: &mut HandlerRegistry,
    resources: Arc<SharedResources>,
    settings: HandlerSettings,
) {
    let settings = Arc::new(settings);
    registry.register(
        TaskKind::Search,
        Arc::new(SearchHandler::new(Arc::clone(&resources))),
    );
    registry.register(
        TaskKind::ConversationCut,
        Arc::new(ConversationCutHandler::new(
            Arc::clone(&resources),
            Arc::clone(&settings),
        )),
    );
    registry.register(
        TaskKind::BubbleImport,
        Arc::new(BubbleImportHandler::new(
            Arc::clone(&resources),
            Arc::clone(&settings),
        )),
    );
    registry.register(
        TaskKind::BenchmarkTest,
        Arc::new(BenchmarkTestHandler::new(Arc::clone(&resources))),
    );
    registry.register(
        TaskKind::HyperParamOptimization,
        Arc::new(HyperParamHandler::new(Arc::clone(&resources))),
    );
    registry.register(
        TaskKind::AddMessages,
        Arc::new(AddMessagesHandler::new(resources, settings)),
    );
}

pub(crate) fn mismatch(request: &TaskRequest, expected: TaskKind) -> HandlerError {
    HandlerError::PayloadMismatch {
        id: request.id(),
        expected,
    }
}

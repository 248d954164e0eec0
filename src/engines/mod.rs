//! Interfaces to the long-running collaborators.
//!
//! Handlers only talk to these traits. [`crate::backend::local`] provides a
//! file-backed implementation of every one of them.

pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cache::{Persist, SharedResources};
use crate::error::{EngineError, ResourceError};
use crate::task::{ParameterRange, SearchSettings};

pub use types::{
    Bubble, ChatMessage, ChatUser, DatasetSummary, ImportedMessage, NewMessage, SearchHit,
};

/// One archived chat deployment: users, bubbles and messages.
pub trait ChatDataset: Persist + Send + Sync {
    fn name(&self) -> &str;

    fn summary(&self) -> DatasetSummary;

    fn user(&self, id: &str) -> Option<ChatUser>;

    fn user_by_name(&self, name: &str) -> Option<ChatUser>;

    fn bubble(&self, id: &str) -> Option<Bubble>;

    fn bubble_by_name(&self, name: &str) -> Option<Bubble>;

    fn message(&self, id: &str) -> Option<ChatMessage>;

    /// Every message, oldest first.
    fn messages(&self) -> Vec<ChatMessage>;

    /// Messages of one bubble, oldest first.
    fn bubble_messages(&self, bubble_id: &str) -> Vec<ChatMessage>;

    /// Return the bubble `id`, creating it with `name` if missing.
    fn create_bubble(&self, id: &str, name: &str) -> Bubble;

    /// Append messages to a bubble. Unknown authors are created and become
    /// bubble members; ids already present are skipped. Returns the number
    /// inserted.
    fn insert_messages(&self, bubble_id: &str, messages: Vec<NewMessage>) -> Result<usize, EngineError>;
}

/// Everything a search needs, passed explicitly per call.
pub struct SearchContext<'a> {
    pub dataset: &'a dyn ChatDataset,
    pub query: &'a str,
    pub user: &'a ChatUser,
    pub settings: &'a SearchSettings,
    pub embeddings: &'a dyn EmbeddingStore,
}

pub trait SearchEngine: Send + Sync {
    fn config_name(&self) -> &str;

    /// The configuration this engine was built from.
    fn config(&self) -> &Value;

    /// Embedding store this engine reads vectors from.
    fn embedding_model(&self) -> &str;

    /// Hits in descending score order.
    fn search(&self, ctx: &SearchContext<'_>) -> Result<Vec<SearchHit>, EngineError>;
}

pub trait ConversationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Group `messages` (oldest first) into conversations of message ids.
    fn cut(&self, messages: &[ChatMessage]) -> Result<Vec<Vec<String>>, EngineError>;
}

/// Memoising text → vector store for one model.
pub trait EmbeddingStore: Persist + Send + Sync {
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;

    /// Number of memoised texts.
    fn cached(&self) -> usize;
}

/// Memoising translator into one target language.
pub trait TranslationStore: Persist + Send + Sync {
    fn language(&self) -> &str;

    fn translate(&self, text: &str) -> String;
}

/// Scores an engine configuration against the benchmarks of a task family.
pub trait BenchmarkRunner: Send + Sync {
    fn run(
        &self,
        task: &str,
        config: &Value,
        resources: &SharedResources,
    ) -> Result<BTreeMap<String, f64>, EngineError>;
}

/// Search space handed to an optimiser.
pub struct OptimizationProblem<'a> {
    pub base_config: &'a Value,
    pub ranges: &'a [ParameterRange],
    pub params: &'a Map<String, Value>,
}

/// One evaluated candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationStep {
    pub iteration: usize,
    pub config: Value,
    pub score: f64,
    pub best_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub config: Value,
    pub score: f64,
}

pub trait HyperParamOptimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Maximise `evaluate` over the problem's ranges, reporting every step.
    fn optimize(
        &self,
        problem: &OptimizationProblem<'_>,
        evaluate: &mut dyn FnMut(&Value) -> Result<f64, EngineError>,
        progress: &mut dyn FnMut(&OptimizationStep),
    ) -> Result<OptimizationResult, EngineError>;
}

/// Factory for every collaborator. Loading methods are only called through
/// [`SharedResources`], which memoises them.
pub trait Backend: Send + Sync {
    fn list_datasets(&self) -> Result<Vec<String>, ResourceError>;

    fn load_dataset(&self, name: &str) -> Result<Arc<dyn ChatDataset>, ResourceError>;

    /// Load `name`, or start an empty dataset if it does not exist yet.
    fn open_or_create_dataset(&self, name: &str) -> Result<Arc<dyn ChatDataset>, ResourceError>;

    /// Named search engine configurations.
    fn search_engine_configs(&self) -> Result<BTreeMap<String, Value>, ResourceError>;

    fn build_search_engine(&self, name: &str, config: &Value) -> Result<Arc<dyn SearchEngine>, ResourceError>;

    fn load_search_engine(&self, name: &str) -> Result<Arc<dyn SearchEngine>, ResourceError> {
        let configs = self.search_engine_configs()?;
        let config = configs.get(name).ok_or_else(|| ResourceError::NotFound {
            kind: crate::cache::ResourceKind::SearchEngine,
            name: name.to_string(),
        })?;
        self.build_search_engine(name, config)
    }

    fn load_conversation_engine(&self, name: &str) -> Result<Arc<dyn ConversationEngine>, ResourceError>;

    fn load_embedding_store(&self, model: &str) -> Result<Arc<dyn EmbeddingStore>, ResourceError>;

    fn load_translation_store(&self, language: &str) -> Result<Arc<dyn TranslationStore>, ResourceError>;

    fn benchmark_runner(&self) -> Arc<dyn BenchmarkRunner>;

    fn optimizer(&self, algorithm: &str) -> Result<Box<dyn HyperParamOptimizer>, EngineError>;

    fn parse_bubble_text(&self, text: &str) -> Result<Vec<ImportedMessage>, EngineError>;
}

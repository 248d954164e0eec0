//! The process-wide set of shared resource caches.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::cache::{Persist, ResourceCache, ResourceKind};
use crate::engines::{
    Backend, ChatDataset, ConversationEngine, EmbeddingStore, SearchEngine, TranslationStore,
};
use crate::error::ResourceError;

/// Result of [`SharedResources::flush_unsaved`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// `(kind, name)` of every entry written.
    pub flushed: Vec<(ResourceKind, String)>,
    /// `(kind, name, error)` of every entry that failed to write.
    pub failures: Vec<(ResourceKind, String, String)>,
}

/// Construct-once caches over a [`Backend`], shared by every worker.
pub struct SharedResources {
    backend: Arc<dyn Backend>,
    datasets: ResourceCache<dyn ChatDataset>,
    search_engines: ResourceCache<dyn SearchEngine>,
    conversation_engines: ResourceCache<dyn ConversationEngine>,
    embeddings: ResourceCache<dyn EmbeddingStore>,
    translations: ResourceCache<dyn TranslationStore>,
}

impl SharedResources {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            datasets: ResourceCache::new(ResourceKind::Dataset),
            search_engines: ResourceCache::new(ResourceKind::SearchEngine),
            conversation_engines: ResourceCache::new(ResourceKind::ConversationEngine),
            embeddings: ResourceCache::new(ResourceKind::EmbeddingStore),
            translations: ResourceCache::new(ResourceKind::TranslationStore),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// An existing dataset. Fails if it was never created.
    pub fn dataset(&self, name: &str) -> Result<Arc<dyn ChatDataset>, ResourceError> {
        self.datasets
            .get_or_create(name, || self.backend.load_dataset(name))
    }

    /// A dataset, created empty on first use if missing.
    pub fn dataset_or_create(&self, name: &str) -> Result<Arc<dyn ChatDataset>, ResourceError> {
        self.datasets
            .get_or_create(name, || self.backend.open_or_create_dataset(name))
    }

    pub fn search_engine(&self, name: &str) -> Result<Arc<dyn SearchEngine>, ResourceError> {
        self.search_engines
            .get_or_create(name, || self.backend.load_search_engine(name))
    }

    /// Named search engine configurations, straight from the backend.
    pub fn search_engine_configs(&self) -> Result<BTreeMap<String, Value>, ResourceError> {
        self.backend.search_engine_configs()
    }

    pub fn conversation_engine(&self, name: &str) -> Result<Arc<dyn ConversationEngine>, ResourceError> {
        self.conversation_engines
            .get_or_create(name, || self.backend.load_conversation_engine(name))
    }

    pub fn embedding_store(&self, model: &str) -> Result<Arc<dyn EmbeddingStore>, ResourceError> {
        self.embeddings
            .get_or_create(model, || self.backend.load_embedding_store(model))
    }

    pub fn translation_store(&self, language: &str) -> Result<Arc<dyn TranslationStore>, ResourceError> {
        self.translations
            .get_or_create(language, || self.backend.load_translation_store(language))
    }

    /// Datasets constructed so far.
    pub fn loaded_datasets(&self) -> Vec<(String, Arc<dyn ChatDataset>)> {
        self.datasets.entries()
    }

    /// Persist every constructed entry that reports unsaved changes.
    pub fn flush_unsaved(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for (name, dataset) in self.datasets.entries() {
            flush_entry(&mut report, ResourceKind::Dataset, name, dataset.as_ref());
        }
        for (name, store) in self.embeddings.entries() {
            flush_entry(&mut report, ResourceKind::EmbeddingStore, name, store.as_ref());
        }
        for (name, store) in self.translations.entries() {
            flush_entry(&mut report, ResourceKind::TranslationStore, name, store.as_ref());
        }

        if !report.flushed.is_empty() || !report.failures.is_empty() {
            info!(
                flushed = report.flushed.len(),
                failures = report.failures.len(),
                "Flushed shared resources"
            );
        }
        report
    }
}

fn flush_entry<P: Persist + ?Sized>(report: &mut FlushReport, kind: ResourceKind, name: String, entry: &P) {
    if !entry.has_unsaved_changes() {
        return;
    }
    match entry.flush() {
        Ok(()) => report.flushed.push((kind, name)),
        Err(e) => {
            error!(kind = %kind, name = %name, error = %e, "Failed to flush shared resource");
            report.failures.push((kind, name, e.to_string()));
        }
    }
}

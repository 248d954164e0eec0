//! Construct-once caches for expensive shared objects.
//!
//! Every key owns its own slot lock, so building one dataset never blocks a
//! lookup of another. The factory for a key runs while that key's slot is
//! held; a concurrent caller for the same key waits and then observes the
//! finished value. A failed factory leaves the slot empty for a later retry.

pub mod resources;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ResourceError;

pub use resources::{FlushReport, SharedResources};

/// Category of a cached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Dataset,
    SearchEngine,
    ConversationEngine,
    EmbeddingStore,
    TranslationStore,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dataset => "dataset",
            Self::SearchEngine => "search engine",
            Self::ConversationEngine => "conversation engine",
            Self::EmbeddingStore => "embedding store",
            Self::TranslationStore => "translation store",
        };
        f.write_str(s)
    }
}

/// A resource that accumulates modifications in memory.
pub trait Persist {
    fn has_unsaved_changes(&self) -> bool;

    /// Write pending modifications to durable storage.
    fn flush(&self) -> Result<(), ResourceError>;
}

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

/// Lazily populated map from name to shared value.
pub struct ResourceCache<V: ?Sized> {
    kind: ResourceKind,
    slots: Mutex<HashMap<String, Slot<V>>>,
}

impl<V: ?Sized> ResourceCache<V> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Return the entry for `name`, building it with `factory` on first use.
    ///
    /// `factory` runs at most once per successful construction; its error is
    /// returned to this caller only and nothing is stored.
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<Arc<V>, ResourceError>
    where
        F: FnOnce() -> Result<Arc<V>, ResourceError>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(name.to_string()).or_default())
        };

        let mut entry = slot.lock();
        if let Some(value) = entry.as_ref() {
            return Ok(Arc::clone(value));
        }

        debug!(kind = %self.kind, name, "Constructing shared resource");
        match factory() {
            Ok(value) => {
                *entry = Some(Arc::clone(&value));
                Ok(value)
            }
            Err(e) => {
                warn!(kind = %self.kind, name, error = %e, "Shared resource construction failed");
                Err(e)
            }
        }
    }

    /// The entry for `name` if it was already built.
    pub fn get(&self, name: &str) -> Option<Arc<V>> {
        let slot = self.slots.lock().get(name).cloned()?;
        let entry = slot.lock();
        entry.clone()
    }

    /// Every constructed entry, sorted by name.
    pub fn entries(&self) -> Vec<(String, Arc<V>)> {
        let slots: Vec<(String, Slot<V>)> = self
            .slots
            .lock()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        let mut entries: Vec<(String, Arc<V>)> = slots
            .into_iter()
            .filter_map(|(name, slot)| slot.lock().clone().map(|value| (name, value)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of constructed entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

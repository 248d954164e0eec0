//! Hashed bag-of-words embeddings memoised in `<data>/cache/embeddings`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use super::{read_json, write_json_atomic};
use crate::cache::{Persist, ResourceKind};
use crate::engines::EmbeddingStore;
use crate::error::ResourceError;

const DEFAULT_DIMENSIONS: usize = 256;

/// Lower-cased alphanumeric tokens of `text`.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// L2-normalised hashed token counts.
pub(crate) fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    for token in tokenize(text) {
        let bucket = (fnv1a(&token) % dimensions as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Dimension count encoded in a model name such as `hashing-512`.
fn dimensions_for(model: &str) -> Result<usize, ResourceError> {
    match model.strip_prefix("hashing") {
        Some("") => Ok(DEFAULT_DIMENSIONS),
        Some(rest) => rest
            .strip_prefix('-')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| ResourceError::Invalid {
                kind: ResourceKind::EmbeddingStore,
                name: model.to_string(),
                reason: "expected `hashing-<dimensions>`".into(),
            }),
        None => Err(ResourceError::NotFound {
            kind: ResourceKind::EmbeddingStore,
            name: model.to_string(),
        }),
    }
}

pub struct LocalEmbeddingStore {
    model: String,
    dimensions: usize,
    path: PathBuf,
    memo: RwLock<HashMap<String, Vec<f32>>>,
    dirty: AtomicBool,
}

impl LocalEmbeddingStore {
    /// Open the store for `model`, reading previously memoised vectors.
    pub fn open(model: &str, path: PathBuf) -> Result<Self, ResourceError> {
        let dimensions = dimensions_for(model)?;
        let mut memo: HashMap<String, Vec<f32>> = if path.exists() {
            read_json(&path)?
        } else {
            HashMap::new()
        };
        memo.retain(|_, v| v.len() == dimensions);
        debug!(model, cached = memo.len(), "Opened embedding store");
        Ok(Self {
            model: model.to_string(),
            dimensions,
            path,
            memo: RwLock::new(memo),
            dirty: AtomicBool::new(false),
        })
    }
}

impl Persist for LocalEmbeddingStore {
    fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<(), ResourceError> {
        let memo = self.memo.read();
        write_json_atomic(&self.path, &*memo)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

impl EmbeddingStore for LocalEmbeddingStore {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.memo.read().get(text) {
            return vector.clone();
        }
        let vector = hashed_embedding(text, self.dimensions);
        self.memo.write().insert(text.to_string(), vector.clone());
        self.dirty.store(true, Ordering::Release);
        vector
    }

    fn cached(&self) -> usize {
        self.memo.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(tokenize("Hello, World! v2"), vec!["hello", "world", "v2"]);
    }

    #[test]
    fn similar_texts_score_higher() {
        let a = hashed_embedding("release date of the app", 256);
        let b = hashed_embedding("the app release date", 256);
        let c = hashed_embedding("lunch menu tomorrow", 256);
        assert!(cosine(&a, &b) > 0.8);
        assert!(cosine(&a, &c) < cosine(&a, &b));
    }

    #[test]
    fn model_name_selects_dimensions() {
        assert_eq!(dimensions_for("hashing-64").unwrap(), 64);
        assert_eq!(dimensions_for("hashing").unwrap(), DEFAULT_DIMENSIONS);
        assert!(matches!(dimensions_for("hashing-0"), Err(ResourceError::Invalid { .. })));
        assert!(matches!(dimensions_for("bert"), Err(ResourceError::NotFound { .. })));
    }

    #[test]
    fn memoised_vectors_survive_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hashing-32.json");
        let store = LocalEmbeddingStore::open("hashing-32", path.clone()).unwrap();
        let vector = store.embed("hello there");
        assert!(store.has_unsaved_changes());
        store.flush().unwrap();

        let reopened = LocalEmbeddingStore::open("hashing-32", path).unwrap();
        assert_eq!(reopened.cached(), 1);
        assert_eq!(reopened.embed("hello there"), vector);
        assert!(!reopened.has_unsaved_changes());
    }
}

//! File-backed implementation of every collaborator.
//!
//! Layout under the data directory:
//! - `datasets/<name>.json`
//! - `search_engines/*.json` (named search engine configurations)
//! - `conversation_engines/*.json`
//! - `cache/embeddings/<model>.json`
//! - `cache/translations/<language>.json`
//! - `benchmarks/search/*.json`
//! - `benchmarks/conversation_cut/*.json`

pub mod benchmark;
pub mod conversation;
pub mod dataset;
pub mod embedding;
pub mod hpo;
pub mod import;
pub mod search;
pub mod translation;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::ResourceKind;
use crate::engines::{
    Backend, BenchmarkRunner, ChatDataset, ConversationEngine, EmbeddingStore, HyperParamOptimizer,
    ImportedMessage, SearchEngine, TranslationStore,
};
use crate::error::{EngineError, ResourceError};

use benchmark::LocalBenchmarkRunner;
use conversation::{ConversationParams, LocalConversationEngine};
use dataset::LocalDataset;
use embedding::LocalEmbeddingStore;
use hpo::RandomSearch;
use search::LocalSearchEngine;
use translation::LocalTranslationStore;

/// Well-known paths relative to the data directory.
pub mod paths {
    pub const DATASETS: &str = "datasets";
    pub const SEARCH_ENGINES: &str = "search_engines";
    pub const CONVERSATION_ENGINES: &str = "conversation_engines";
    pub const EMBEDDINGS: &str = "cache/embeddings";
    pub const TRANSLATIONS: &str = "cache/translations";
    pub const SEARCH_BENCHMARKS: &str = "benchmarks/search";
    pub const CONVERSATION_BENCHMARKS: &str = "benchmarks/conversation_cut";
}

/// Name of the built-in search and conversation engine configurations.
pub const DEFAULT_ENGINE: &str = "default";

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ResourceError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write `value` next to `path` and rename it into place.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ResourceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// `(stem, path)` of every `*.json` file in `dir`, sorted by stem. Hidden
/// files are skipped; a missing directory yields nothing.
pub(crate) fn json_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, ResourceError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        files.push((stem.to_string(), path.clone()));
    }
    files.sort();
    Ok(files)
}

/// Backend rooted at one data directory.
pub struct LocalBackend {
    root: PathBuf,
    benchmarks: Arc<LocalBenchmarkRunner>,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let benchmarks = Arc::new(LocalBenchmarkRunner::new(
            root.join(paths::SEARCH_BENCHMARKS),
            root.join(paths::CONVERSATION_BENCHMARKS),
        ));
        Self { root, benchmarks }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory layout if missing.
    pub fn ensure_dirs(&self) -> Result<(), ResourceError> {
        for dir in [
            paths::DATASETS,
            paths::SEARCH_ENGINES,
            paths::CONVERSATION_ENGINES,
            paths::EMBEDDINGS,
            paths::TRANSLATIONS,
            paths::SEARCH_BENCHMARKS,
            paths::CONVERSATION_BENCHMARKS,
        ] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    fn dataset_path(&self, name: &str) -> Result<PathBuf, ResourceError> {
        Ok(self
            .root
            .join(paths::DATASETS)
            .join(format!("{}.json", checked_name(ResourceKind::Dataset, name)?)))
    }
}

/// Reject names that would escape their directory.
fn checked_name(kind: ResourceKind, name: &str) -> Result<&str, ResourceError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(ResourceError::Invalid {
            kind,
            name: name.to_string(),
            reason: "names may only contain letters, digits, '-', '_' and '.'".into(),
        })
    }
}

impl Backend for LocalBackend {
    fn list_datasets(&self) -> Result<Vec<String>, ResourceError> {
        Ok(json_files(&self.root.join(paths::DATASETS))?
            .into_iter()
            .map(|(stem, _)| stem)
            .collect())
    }

    fn load_dataset(&self, name: &str) -> Result<Arc<dyn ChatDataset>, ResourceError> {
        let path = self.dataset_path(name)?;
        Ok(Arc::new(LocalDataset::load(name, path)?))
    }

    fn open_or_create_dataset(&self, name: &str) -> Result<Arc<dyn ChatDataset>, ResourceError> {
        let path = self.dataset_path(name)?;
        if path.exists() {
            return Ok(Arc::new(LocalDataset::load(name, path)?));
        }
        debug!(dataset = name, "Creating empty dataset");
        Ok(Arc::new(LocalDataset::empty(name, path)))
    }

    fn search_engine_configs(&self) -> Result<BTreeMap<String, Value>, ResourceError> {
        let mut configs = BTreeMap::new();
        configs.insert(DEFAULT_ENGINE.to_string(), serde_json::json!({}));
        for (stem, path) in json_files(&self.root.join(paths::SEARCH_ENGINES))? {
            let mut config: Value = match read_json(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable search engine config");
                    continue;
                }
            };
            let name = config
                .get("config_name")
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(name) = name else {
                warn!(path = %path.display(), file = %stem, "Skipping search engine config without config_name");
                continue;
            };
            if let Value::Object(map) = &mut config {
                map.remove("config_name");
            }
            configs.insert(name, config);
        }
        Ok(configs)
    }

    fn build_search_engine(&self, name: &str, config: &Value) -> Result<Arc<dyn SearchEngine>, ResourceError> {
        Ok(Arc::new(LocalSearchEngine::from_config(name, config)?))
    }

    fn load_conversation_engine(&self, name: &str) -> Result<Arc<dyn ConversationEngine>, ResourceError> {
        let name = checked_name(ResourceKind::ConversationEngine, name)?;
        let path = self
            .root
            .join(paths::CONVERSATION_ENGINES)
            .join(format!("{name}.json"));
        if path.exists() {
            let config: Value = read_json(&path)?;
            return Ok(Arc::new(LocalConversationEngine::from_config(name, &config)?));
        }
        if name == DEFAULT_ENGINE {
            return Ok(Arc::new(LocalConversationEngine::new(name, ConversationParams::default())));
        }
        Err(ResourceError::NotFound {
            kind: ResourceKind::ConversationEngine,
            name: name.to_string(),
        })
    }

    fn load_embedding_store(&self, model: &str) -> Result<Arc<dyn EmbeddingStore>, ResourceError> {
        let model = checked_name(ResourceKind::EmbeddingStore, model)?;
        let path = self.root.join(paths::EMBEDDINGS).join(format!("{model}.json"));
        Ok(Arc::new(LocalEmbeddingStore::open(model, path)?))
    }

    fn load_translation_store(&self, language: &str) -> Result<Arc<dyn TranslationStore>, ResourceError> {
        let language = checked_name(ResourceKind::TranslationStore, language)?;
        let path = self.root.join(paths::TRANSLATIONS).join(format!("{language}.json"));
        Ok(Arc::new(LocalTranslationStore::open(language, path)?))
    }

    fn benchmark_runner(&self) -> Arc<dyn BenchmarkRunner> {
        self.benchmarks.clone()
    }

    fn optimizer(&self, algorithm: &str) -> Result<Box<dyn HyperParamOptimizer>, EngineError> {
        match algorithm {
            "random_search" => Ok(Box::new(RandomSearch)),
            other => Err(EngineError::Unsupported(format!("optimisation algorithm `{other}`"))),
        }
    }

    fn parse_bubble_text(&self, text: &str) -> Result<Vec<ImportedMessage>, EngineError> {
        import::parse_transcript(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedResources;
    use crate::engines::NewMessage;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, value: Value) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn search_engine_configs_include_default_and_skip_hidden_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "search_engines/fast.json", json!({ "config_name": "fast", "top_k": 3 }));
        write(dir.path(), "search_engines/.draft.json", json!({ "config_name": "draft" }));
        write(dir.path(), "search_engines/anon.json", json!({ "top_k": 3 }));

        let backend = LocalBackend::new(dir.path());
        let configs = backend.search_engine_configs().unwrap();
        assert_eq!(configs.keys().collect::<Vec<_>>(), vec!["default", "fast"]);
        assert_eq!(configs["fast"], json!({ "top_k": 3 }));
        assert_eq!(backend.load_search_engine("fast").unwrap().config_name(), "fast");
        assert!(matches!(
            backend.load_search_engine("draft"),
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[test]
    fn rejects_path_traversal_names() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert!(matches!(
            backend.load_dataset("../etc/passwd"),
            Err(ResourceError::Invalid { .. })
        ));
    }

    #[test]
    fn conversation_engine_falls_back_to_builtin_default() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert_eq!(backend.load_conversation_engine("default").unwrap().name(), "default");
        assert!(backend.load_conversation_engine("tuned").is_err());
    }

    #[test]
    fn flush_unsaved_persists_dirty_resources() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalBackend::new(dir.path()));
        let resources = SharedResources::new(backend.clone());

        let dataset = resources.dataset_or_create("demo").unwrap();
        dataset.create_bubble("b1", "General");
        dataset
            .insert_messages(
                "b1",
                vec![NewMessage {
                    id: "m1".into(),
                    author_id: "u1".into(),
                    author_name: "Ann".into(),
                    content: "hello".into(),
                    date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                    answered_message_id: None,
                }],
            )
            .unwrap();
        resources.embedding_store("hashing-16").unwrap().embed("hello");
        resources.translation_store("fr").unwrap();

        let report = resources.flush_unsaved();
        assert_eq!(report.flushed.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(backend.list_datasets().unwrap(), vec!["demo".to_string()]);
        assert!(dir.path().join("cache/embeddings/hashing-16.json").exists());

        // Nothing left to write.
        assert!(resources.flush_unsaved().flushed.is_empty());
    }

    #[test]
    fn unknown_optimizer_is_unsupported() {
        let backend = LocalBackend::new("/nonexistent");
        assert!(matches!(
            backend.optimizer("genetic"),
            Err(EngineError::Unsupported(_))
        ));
    }
}

//! Dictionary translation memoised in `<data>/cache/translations`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{read_json, write_json_atomic};
use crate::cache::Persist;
use crate::engines::TranslationStore;
use crate::error::ResourceError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TranslationFile {
    /// Lower-cased word → translated word.
    #[serde(default)]
    dictionary: HashMap<String, String>,
    /// Full text → translation, filled as texts are translated.
    #[serde(default)]
    sentences: HashMap<String, String>,
}

/// Word-by-word translator into one language. Words missing from the
/// dictionary are kept as-is.
pub struct LocalTranslationStore {
    language: String,
    path: PathBuf,
    data: RwLock<TranslationFile>,
    dirty: AtomicBool,
}

impl LocalTranslationStore {
    pub fn open(language: &str, path: PathBuf) -> Result<Self, ResourceError> {
        let data = if path.exists() {
            read_json(&path)?
        } else {
            TranslationFile::default()
        };
        Ok(Self {
            language: language.to_string(),
            path,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        })
    }

    fn translate_words(dictionary: &HashMap<String, String>, text: &str) -> String {
        text.split_whitespace()
            .map(|word| {
                let key: String = word
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                match dictionary.get(&key) {
                    Some(translated) if !key.is_empty() => word.to_lowercase().replace(&key, translated),
                    _ => word.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Persist for LocalTranslationStore {
    fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<(), ResourceError> {
        let data = self.data.read();
        write_json_atomic(&self.path, &*data)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

impl TranslationStore for LocalTranslationStore {
    fn language(&self) -> &str {
        &self.language
    }

    fn translate(&self, text: &str) -> String {
        {
            let data = self.data.read();
            if let Some(known) = data.sentences.get(text) {
                return known.clone();
            }
        }
        let mut data = self.data.write();
        let translated = Self::translate_words(&data.dictionary, text);
        data.sentences.insert(text.to_string(), translated.clone());
        self.dirty.store(true, Ordering::Release);
        translated
    }
}

//! JSON-file dataset.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{read_json, write_json_atomic};
use crate::cache::{Persist, ResourceKind};
use crate::engines::{Bubble, ChatDataset, ChatMessage, ChatUser, DatasetSummary, NewMessage};
use crate::error::{EngineError, ResourceError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatasetFile {
    #[serde(default)]
    users: Vec<ChatUser>,
    #[serde(default)]
    bubbles: Vec<Bubble>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// A dataset held in memory and written back to `<data>/datasets/<name>.json`.
pub struct LocalDataset {
    name: String,
    path: PathBuf,
    data: RwLock<DatasetFile>,
    dirty: AtomicBool,
}

impl LocalDataset {
    pub fn load(name: &str, path: PathBuf) -> Result<Self, ResourceError> {
        if !path.exists() {
            return Err(ResourceError::NotFound {
                kind: ResourceKind::Dataset,
                name: name.to_string(),
            });
        }
        let mut data: DatasetFile = read_json(&path)?;
        data.messages.sort_by(|a, b| a.date.cmp(&b.date));
        debug!(dataset = name, messages = data.messages.len(), "Loaded dataset");
        Ok(Self {
            name: name.to_string(),
            path,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        })
    }

    /// An empty dataset that is written on first flush.
    pub fn empty(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
            data: RwLock::new(DatasetFile::default()),
            dirty: AtomicBool::new(true),
        }
    }
}

impl Persist for LocalDataset {
    fn has_unsaved_changes(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<(), ResourceError> {
        let data = self.data.read();
        write_json_atomic(&self.path, &*data)?;
        self.dirty.store(false, Ordering::Release);
        debug!(dataset = %self.name, path = %self.path.display(), "Dataset flushed");
        Ok(())
    }
}

impl ChatDataset for LocalDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn summary(&self) -> DatasetSummary {
        let data = self.data.read();
        DatasetSummary {
            name: self.name.clone(),
            nb_bubbles: data.bubbles.len(),
            nb_users: data.users.len(),
            nb_messages: data.messages.len(),
        }
    }

    fn user(&self, id: &str) -> Option<ChatUser> {
        self.data.read().users.iter().find(|u| u.id == id).cloned()
    }

    fn user_by_name(&self, name: &str) -> Option<ChatUser> {
        self.data.read().users.iter().find(|u| u.name == name).cloned()
    }

    fn bubble(&self, id: &str) -> Option<Bubble> {
        self.data.read().bubbles.iter().find(|b| b.id == id).cloned()
    }

    fn bubble_by_name(&self, name: &str) -> Option<Bubble> {
        self.data.read().bubbles.iter().find(|b| b.name == name).cloned()
    }

    fn message(&self, id: &str) -> Option<ChatMessage> {
        self.data.read().messages.iter().find(|m| m.id == id).cloned()
    }

    fn messages(&self) -> Vec<ChatMessage> {
        self.data.read().messages.clone()
    }

    fn bubble_messages(&self, bubble_id: &str) -> Vec<ChatMessage> {
        self.data
            .read()
            .messages
            .iter()
            .filter(|m| m.bubble_id == bubble_id)
            .cloned()
            .collect()
    }

    fn create_bubble(&self, id: &str, name: &str) -> Bubble {
        let mut data = self.data.write();
        if let Some(existing) = data.bubbles.iter().find(|b| b.id == id) {
            return existing.clone();
        }
        let bubble = Bubble {
            id: id.to_string(),
            name: name.to_string(),
            members: Vec::new(),
        };
        data.bubbles.push(bubble.clone());
        self.dirty.store(true, Ordering::Release);
        bubble
    }

    fn insert_messages(&self, bubble_id: &str, messages: Vec<NewMessage>) -> Result<usize, EngineError> {
        let mut data = self.data.write();
        let data = &mut *data;
        let bubble_index = data
            .bubbles
            .iter()
            .position(|b| b.id == bubble_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown bubble `{bubble_id}`")))?;

        let mut known: HashSet<String> = data.messages.iter().map(|m| m.id.clone()).collect();
        let mut inserted = 0;
        for message in messages {
            if !known.insert(message.id.clone()) {
                continue;
            }
            if !data.users.iter().any(|u| u.id == message.author_id) {
                data.users.push(ChatUser {
                    id: message.author_id.clone(),
                    name: message.author_name.clone(),
                });
            }
            let bubble = &mut data.bubbles[bubble_index];
            if !bubble.is_member(&message.author_id) {
                bubble.members.push(message.author_id.clone());
            }
            data.messages.push(ChatMessage {
                id: message.id,
                bubble_id: bubble_id.to_string(),
                author_id: message.author_id,
                content: message.content,
                date: message.date,
                answered_message_id: message.answered_message_id,
            });
            inserted += 1;
        }

        if inserted > 0 {
            data.messages.sort_by(|a, b| a.date.cmp(&b.date));
            self.dirty.store(true, Ordering::Release);
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn new_message(id: &str, author: &str, minutes: i64) -> NewMessage {
        NewMessage {
            id: id.into(),
            author_id: author.into(),
            author_name: author.to_uppercase(),
            content: format!("message {id}"),
            date: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes),
            answered_message_id: None,
        }
    }

    #[test]
    fn insert_creates_authors_and_skips_duplicates() {
        let dir = TempDir::new().unwrap();
        let dataset = LocalDataset::empty("demo", dir.path().join("demo.json"));
        dataset.create_bubble("b1", "General");

        let inserted = dataset
            .insert_messages("b1", vec![new_message("m2", "bob", 5), new_message("m1", "alice", 0)])
            .unwrap();
        assert_eq!(inserted, 2);
        let again = dataset
            .insert_messages("b1", vec![new_message("m1", "alice", 0)])
            .unwrap();
        assert_eq!(again, 0);

        let summary = dataset.summary();
        assert_eq!(summary.nb_users, 2);
        assert_eq!(summary.nb_messages, 2);
        assert!(dataset.bubble("b1").unwrap().is_member("bob"));
        // Kept in date order.
        let ids: Vec<String> = dataset.bubble_messages("b1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn insert_into_unknown_bubble_fails() {
        let dir = TempDir::new().unwrap();
        let dataset = LocalDataset::empty("demo", dir.path().join("demo.json"));
        let err = dataset
            .insert_messages("nope", vec![new_message("m1", "alice", 0)])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn flush_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datasets").join("demo.json");
        let dataset = LocalDataset::empty("demo", path.clone());
        dataset.create_bubble("b1", "General");
        dataset
            .insert_messages("b1", vec![new_message("m1", "alice", 0)])
            .unwrap();
        assert!(dataset.has_unsaved_changes());
        dataset.flush().unwrap();
        assert!(!dataset.has_unsaved_changes());

        let reloaded = LocalDataset::load("demo", path).unwrap();
        assert_eq!(reloaded.summary(), dataset.summary());
        assert_eq!(reloaded.user_by_name("ALICE").unwrap().id, "alice");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = LocalDataset::load("ghost", dir.path().join("ghost.json")).err().unwrap();
        assert!(matches!(err, ResourceError::NotFound { .. }));
    }
}

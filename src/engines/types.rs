//! Plain data shared by the engine traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub name: String,
}

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bubble {
    pub id: String,
    pub name: String,
    /// Ids of users allowed to read the bubble.
    #[serde(default)]
    pub members: Vec<String>,
}

impl Bubble {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub bubble_id: String,
    pub author_id: String,
    pub content: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_message_id: Option<String>,
}

/// A message to insert; unknown authors are created from `author_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub date: DateTime<Utc>,
    pub answered_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub nb_bubbles: usize,
    pub nb_users: usize,
    pub nb_messages: usize,
}

/// One scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub message: ChatMessage,
    pub score: f32,
}

/// A message recovered from an exported bubble transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMessage {
    pub author_name: String,
    pub date: DateTime<Utc>,
    pub content: String,
}

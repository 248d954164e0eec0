//! Reply-link and time-gap conversation segmentation.

use std::collections::HashMap;

use chrono::Duration;
use serde::Deserialize;

use crate::cache::ResourceKind;
use crate::engines::{ChatMessage, ConversationEngine};
use crate::error::{EngineError, ResourceError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConversationParams {
    /// A message more than this many minutes after the latest open
    /// conversation starts a new one, unless it replies to an earlier one.
    pub max_gap_minutes: i64,
}

impl Default for ConversationParams {
    fn default() -> Self {
        Self { max_gap_minutes: 30 }
    }
}

pub struct LocalConversationEngine {
    name: String,
    params: ConversationParams,
}

impl LocalConversationEngine {
    pub fn new(name: &str, params: ConversationParams) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    pub fn from_config(name: &str, config: &serde_json::Value) -> Result<Self, ResourceError> {
        let params: ConversationParams =
            serde_json::from_value(config.clone()).map_err(|e| ResourceError::Invalid {
                kind: ResourceKind::ConversationEngine,
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if params.max_gap_minutes <= 0 {
            return Err(ResourceError::Invalid {
                kind: ResourceKind::ConversationEngine,
                name: name.to_string(),
                reason: "max_gap_minutes must be positive".into(),
            });
        }
        Ok(Self::new(name, params))
    }
}

impl ConversationEngine for LocalConversationEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn cut(&self, messages: &[ChatMessage]) -> Result<Vec<Vec<String>>, EngineError> {
        let gap = Duration::minutes(self.params.max_gap_minutes);
        let mut conversations: Vec<Vec<String>> = Vec::new();
        // Message id → conversation index.
        let mut owner: HashMap<&str, usize> = HashMap::new();
        let mut last_seen: Vec<chrono::DateTime<chrono::Utc>> = Vec::new();

        for message in messages {
            let replied = message
                .answered_message_id
                .as_deref()
                .and_then(|parent| owner.get(parent).copied());

            let index = match replied {
                Some(index) => index,
                None => match last_seen.last() {
                    Some(latest) if message.date - *latest <= gap => last_seen.len() - 1,
                    _ => {
                        conversations.push(Vec::new());
                        last_seen.push(message.date);
                        conversations.len() - 1
                    }
                },
            };

            conversations[index].push(message.id.clone());
            if message.date > last_seen[index] {
                last_seen[index] = message.date;
            }
            owner.insert(message.id.as_str(), index);
        }

        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, minutes: i64, reply_to: Option<&str>) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            bubble_id: "b".into(),
            author_id: "a".into(),
            content: String::new(),
            date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
            answered_message_id: reply_to.map(str::to_string),
        }
    }

    #[test]
    fn splits_on_time_gap() {
        let engine = LocalConversationEngine::new("default", ConversationParams { max_gap_minutes: 10 });
        let messages = vec![msg("1", 0, None), msg("2", 5, None), msg("3", 60, None)];
        assert_eq!(
            engine.cut(&messages).unwrap(),
            vec![vec!["1".to_string(), "2".to_string()], vec!["3".to_string()]]
        );
    }

    #[test]
    fn reply_joins_the_parent_conversation() {
        let engine = LocalConversationEngine::new("default", ConversationParams { max_gap_minutes: 10 });
        let messages = vec![
            msg("1", 0, None),
            msg("2", 60, None),
            msg("3", 65, Some("1")),
        ];
        assert_eq!(
            engine.cut(&messages).unwrap(),
            vec![vec!["1".to_string(), "3".to_string()], vec!["2".to_string()]]
        );
    }

    #[test]
    fn rejects_non_positive_gap() {
        let result = LocalConversationEngine::from_config("x", &serde_json::json!({ "max_gap_minutes": 0 }));
        assert!(matches!(result, Err(ResourceError::Invalid { .. })));
    }
}

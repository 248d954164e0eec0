//! Inbound message decoding and routing, shared by both front ends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::SharedResources;
use crate::channels::{ClientHandle, OutboundMessage};
use crate::error::ChannelError;
use crate::task::{
    AddMessagesRequest, BenchmarkTestRequest, BubbleImportRequest, ConversationCutRequest,
    HyperParamRequest, MessagePayload, SearchRequest, SearchSettings, TaskPayload, TaskRequest,
};
use crate::worker::Dispatcher;

/// Prefix turning a chat message into a search.
const SEARCH_COMMAND: &str = "/search ";

/// Everything a client can send. Tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ping,
    Search(SearchRequest),
    ConversationCut(ConversationCutRequest),
    BubbleImport(BubbleImportRequest),
    BenchmarkTest(BenchmarkTestRequest),
    HyperParamOptimization(HyperParamRequest),
    AddMessages(AddMessagesRequest),
    NewMessage(NewMessageEvent),
}

/// A live chat message forwarded by the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageEvent {
    #[serde(alias = "rbi_name")]
    pub dataset: String,
    pub bubble_id: String,
    pub message: MessagePayload,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::InvalidMessage(e.to_string()))
    }
}

/// Shared state of both front ends.
pub struct FrontendContext {
    pub dispatcher: Dispatcher,
    pub resources: Arc<SharedResources>,
    /// Engine used by `/search` chat commands.
    pub default_search_engine: String,
    /// Users (typically bots) never returned by `/search` chat commands.
    pub excluded_users: Vec<String>,
}

impl FrontendContext {
    /// Decode one frame and route it. Malformed frames are ignored.
    pub fn handle_text(&self, text: &str, client: &ClientHandle) {
        match InboundMessage::parse(text) {
            Ok(message) => self.route(message, client),
            Err(e) => debug!(client_id = %client.id(), error = %e, text = text, "Ignoring malformed message"),
        }
    }

    pub fn route(&self, message: InboundMessage, client: &ClientHandle) {
        let payload: TaskPayload = match message {
            InboundMessage::Ping => {
                client.send(OutboundMessage::Pong);
                return;
            }
            InboundMessage::Search(r) => r.into(),
            InboundMessage::ConversationCut(r) => r.into(),
            InboundMessage::BubbleImport(r) => r.into(),
            InboundMessage::BenchmarkTest(r) => r.into(),
            InboundMessage::HyperParamOptimization(r) => r.into(),
            InboundMessage::AddMessages(r) => r.into(),
            InboundMessage::NewMessage(event) => self.new_message(event),
        };
        self.dispatcher
            .submit_request(TaskRequest::new(client.clone(), payload));
    }

    /// `/search <query>` becomes a search; anything else is stored.
    fn new_message(&self, event: NewMessageEvent) -> TaskPayload {
        match event.message.content.strip_prefix(SEARCH_COMMAND) {
            Some(query) if !query.trim().is_empty() => SearchRequest {
                query: query.trim().to_string(),
                user_id: event.message.author_id.clone(),
                settings: SearchSettings {
                    exclude_users: self.excluded_users.clone(),
                    ..Default::default()
                },
                engine: self.default_search_engine.clone(),
                dataset: event.dataset,
                origin_message_id: Some(event.message.id.clone()),
                origin_bubble_id: Some(event.bubble_id),
            }
            .into(),
            Some(_) => {
                warn!(message_id = %event.message.id, "Empty /search command stored as a message");
                Self::add_message(event)
            }
            None => Self::add_message(event),
        }
    }

    fn add_message(event: NewMessageEvent) -> TaskPayload {
        AddMessagesRequest {
            dataset: event.dataset,
            bubble_id: event.bubble_id,
            messages: vec![event.message],
        }
        .into()
    }

    /// Messages sent to a WebSocket client right after it connects.
    pub fn welcome_messages(&self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();

        match self.resources.backend().list_datasets() {
            Ok(names) => {
                for name in names {
                    match self.resources.dataset(&name) {
                        Ok(dataset) => {
                            let summary = dataset.summary();
                            messages.push(OutboundMessage::DatasetInfo {
                                dataset: summary.name,
                                nb_bubbles: summary.nb_bubbles,
                                nb_users: summary.nb_users,
                                nb_messages: summary.nb_messages,
                            });
                        }
                        Err(e) => warn!(dataset = %name, error = %e, "Skipping unloadable dataset"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list datasets"),
        }

        match self.resources.search_engine_configs() {
            Ok(configs) => {
                for (config_name, config) in configs {
                    messages.push(OutboundMessage::SearchEngineConfiguration { config_name, config });
                }
            }
            Err(e) => warn!(error = %e, "Failed to list search engine configurations"),
        }

        messages.push(OutboundMessage::DefaultSearchEngineConfigName {
            config_name: self.default_search_engine.clone(),
        });
        messages
    }
}

//! Task requests: one per inbound client message that needs a worker.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channels::ClientHandle;
use crate::task::TaskKind;

/// A request queued for a worker. Immutable once built.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    id: Uuid,
    client: ClientHandle,
    payload: TaskPayload,
    created_at: DateTime<Utc>,
}

impl TaskRequest {
    /// Build a request on behalf of a connected client.
    pub fn new(client: ClientHandle, payload: impl Into<TaskPayload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            payload: payload.into(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Handle used to push progress, results and failures back to the client.
    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn client_id(&self) -> &str {
        self.client.id()
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Kind-specific payload of a [`TaskRequest`].
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Search(SearchRequest),
    ConversationCut(ConversationCutRequest),
    BubbleImport(BubbleImportRequest),
    BenchmarkTest(BenchmarkTestRequest),
    HyperParamOptimization(HyperParamRequest),
    AddMessages(AddMessagesRequest),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Search(_) => TaskKind::Search,
            Self::ConversationCut(_) => TaskKind::ConversationCut,
            Self::BubbleImport(_) => TaskKind::BubbleImport,
            Self::BenchmarkTest(_) => TaskKind::BenchmarkTest,
            Self::HyperParamOptimization(_) => TaskKind::HyperParamOptimization,
            Self::AddMessages(_) => TaskKind::AddMessages,
        }
    }
}

macro_rules! payload_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for TaskPayload {
                fn from(request: $ty) -> Self {
                    TaskPayload::$variant(request)
                }
            }
        )*
    };
}

payload_from! {
    Search => SearchRequest,
    ConversationCut => ConversationCutRequest,
    BubbleImport => BubbleImportRequest,
    BenchmarkTest => BenchmarkTestRequest,
    HyperParamOptimization => HyperParamRequest,
    AddMessages => AddMessagesRequest,
}

/// Semantic search over one dataset on behalf of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(alias = "search_input")]
    pub query: String,
    pub user_id: String,
    #[serde(default, alias = "search_settings")]
    pub settings: SearchSettings,
    #[serde(alias = "engine_config")]
    pub engine: String,
    #[serde(alias = "rbi_name")]
    pub dataset: String,
    /// Message that carried the search command (socket API only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_bubble_id: Option<String>,
}

/// Per-search filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub exclude_users: Vec<String>,
    #[serde(default)]
    pub exclude_bubbles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Translate the query to this language before searching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate_to: Option<String>,
}

/// Split one bubble's history into conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationCutRequest {
    #[serde(alias = "rbi_name")]
    pub dataset: String,
    pub bubble_id: String,
}

/// Import an exported bubble transcript into a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleImportRequest {
    #[serde(alias = "rbi_name")]
    pub dataset: String,
    pub bubble_name: String,
    #[serde(alias = "bubble_text_to_import")]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkMode {
    Single,
    Curve,
}

/// Values swept for one engine parameter in curve mode, keyed by point id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveParameters {
    pub parameter: String,
    pub points: BTreeMap<u32, f64>,
}

/// Score one engine configuration against a task family's benchmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkTestRequest {
    pub task: String,
    #[serde(alias = "config_dict")]
    pub engine_config: serde_json::Value,
    #[serde(alias = "test_benchmark_type")]
    pub mode: BenchmarkMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<CurveParameters>,
}

/// Range explored for one hyper-parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub integer: bool,
}

/// Run an optimisation algorithm over engine hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperParamRequest {
    #[serde(alias = "id_request")]
    pub request_id: u64,
    pub task: String,
    #[serde(alias = "base_engine_config")]
    pub base_config: serde_json::Value,
    #[serde(alias = "hyper_parameters_to_optimize")]
    pub ranges: Vec<ParameterRange>,
    /// Benchmark name → weight in the objective.
    #[serde(alias = "benchmarks_to_optimize")]
    pub benchmarks: BTreeMap<String, f64>,
    #[serde(alias = "algo_name")]
    pub algorithm: String,
    #[serde(default, alias = "algorithm_parameters")]
    pub algorithm_params: serde_json::Map<String, serde_json::Value>,
}

/// Append live messages to a bubble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMessagesRequest {
    #[serde(alias = "rbi_name")]
    pub dataset: String,
    pub bubble_id: String,
    #[serde(alias = "msgs")]
    pub messages: Vec<MessagePayload>,
}

/// A chat message as sent by a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub bubble_name: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub answered_message_id: Option<String>,
}

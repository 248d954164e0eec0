//! Messages pushed from the server to clients.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::TaskKind;

/// Every message a client can receive. Serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected {
        client_id: String,
    },
    Pong,
    Error {
        message: String,
    },
    DatasetInfo {
        dataset: String,
        nb_bubbles: usize,
        nb_users: usize,
        nb_messages: usize,
    },
    SearchEngineConfiguration {
        config_name: String,
        config: serde_json::Value,
    },
    DefaultSearchEngineConfigName {
        config_name: String,
    },

    // ── Search ──────────────────────────────────────────────────────────
    SearchCanceled {
        search_input: String,
        reason: String,
    },
    SearchWillBeDone {
        search_input: String,
    },
    PrepareSearchResults {
        search_input: String,
        nb_results: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_msg_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_msg_bubble_id: Option<String>,
        /// Seconds spent in the engine.
        search_time: f64,
    },
    SearchResult {
        search_input: String,
        rank: usize,
        score: f32,
        message_id: String,
        content: String,
        author_id: String,
        author_name: String,
        bubble_id: String,
        bubble_name: String,
        date: DateTime<Utc>,
    },

    // ── Conversation cut ────────────────────────────────────────────────
    ConversationCutCanceled {
        dataset: String,
        bubble_id: String,
        reason: String,
    },
    ConversationCutResults {
        dataset: String,
        bubble_id: String,
        conversations: Vec<Vec<String>>,
    },

    // ── Bubble import / live messages ───────────────────────────────────
    BubbleImportError {
        dataset: String,
        bubble_name: String,
        error: String,
    },
    BubbleImportStarted {
        dataset: String,
        bubble_name: String,
        nb_msgs: usize,
        /// Rough remaining time in seconds.
        estimated_time: f64,
    },
    BubbleImportProgressUpdate {
        dataset: String,
        bubble_name: String,
        msgs_processed: usize,
        estimated_time: f64,
    },
    BubbleImportFinished {
        dataset: String,
        bubble_name: String,
        bubble_id: String,
    },
    MessagesAdded {
        dataset: String,
        bubble_id: String,
        nb_added: usize,
    },

    // ── Benchmarks / hyper-parameter optimisation ───────────────────────
    HpoSingleTestBenchmarkResults {
        task: String,
        scores: BTreeMap<String, f64>,
    },
    HpoCurveTestBenchmarkResults {
        task: String,
        parameter: String,
        results: BTreeMap<u32, BTreeMap<String, f64>>,
    },
    HpoAlgoOptiUpdate {
        request_id: u64,
        iteration: usize,
        config: serde_json::Value,
        score: f64,
        best_score: f64,
    },
    HpoAlgoOptiResult {
        request_id: u64,
        config: serde_json::Value,
        score: f64,
    },

    /// The worker could not complete a request.
    TaskFailed {
        kind: TaskKind,
        request_id: Uuid,
        error: String,
    },
}

impl OutboundMessage {
    /// Wire tag, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
            Self::DatasetInfo { .. } => "dataset_info",
            Self::SearchEngineConfiguration { .. } => "search_engine_configuration",
            Self::DefaultSearchEngineConfigName { .. } => "default_search_engine_config_name",
            Self::SearchCanceled { .. } => "search_canceled",
            Self::SearchWillBeDone { .. } => "search_will_be_done",
            Self::PrepareSearchResults { .. } => "prepare_search_results",
            Self::SearchResult { .. } => "search_result",
            Self::ConversationCutCanceled { .. } => "conversation_cut_canceled",
            Self::ConversationCutResults { .. } => "conversation_cut_results",
            Self::BubbleImportError { .. } => "bubble_import_error",
            Self::BubbleImportStarted { .. } => "bubble_import_started",
            Self::BubbleImportProgressUpdate { .. } => "bubble_import_progress_update",
            Self::BubbleImportFinished { .. } => "bubble_import_finished",
            Self::MessagesAdded { .. } => "messages_added",
            Self::HpoSingleTestBenchmarkResults { .. } => "hpo_single_test_benchmark_results",
            Self::HpoCurveTestBenchmarkResults { .. } => "hpo_curve_test_benchmark_results",
            Self::HpoAlgoOptiUpdate { .. } => "hpo_algo_opti_update",
            Self::HpoAlgoOptiResult { .. } => "hpo_algo_opti_result",
            Self::TaskFailed { .. } => "task_failed",
        }
    }
}

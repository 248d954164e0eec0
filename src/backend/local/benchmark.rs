//! Labelled benchmarks, one JSON file each.
//!
//! - `search`: `<data>/benchmarks/search/*.json`, scored by hit rate.
//! - `conversation_cut`: `<data>/benchmarks/conversation_cut/*.json`,
//!   scored by pairwise agreement with the expected grouping.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::conversation::LocalConversationEngine;
use super::search::LocalSearchEngine;
use super::{json_files, read_json};
use crate::cache::SharedResources;
use crate::engines::{BenchmarkRunner, ChatMessage, ConversationEngine, SearchContext, SearchEngine};
use crate::error::EngineError;
use crate::task::SearchSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkQuery {
    pub query: String,
    /// Message ids counted as a hit.
    pub expected: Vec<String>,
}

/// One benchmark: a dataset, the user searching, and labelled queries.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchBenchmark {
    #[serde(default)]
    pub name: Option<String>,
    pub dataset: String,
    pub user_id: String,
    pub queries: Vec<BenchmarkQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkMessage {
    pub id: String,
    pub author_id: String,
    #[serde(default)]
    pub content: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub answered_message_id: Option<String>,
}

/// Standalone messages and the conversations they should be cut into.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationBenchmark {
    #[serde(default)]
    pub name: Option<String>,
    pub messages: Vec<BenchmarkMessage>,
    /// Expected conversations as groups of message ids.
    pub expected: Vec<Vec<String>>,
}

/// Anything with an optional display name overriding the file stem.
trait Named {
    fn name(&self) -> Option<&str>;
}

impl Named for SearchBenchmark {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Named for ConversationBenchmark {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn load_all<T: DeserializeOwned + Named>(dir: &Path) -> Result<Vec<(String, T)>, EngineError> {
    let mut benchmarks = Vec::new();
    for (stem, path) in json_files(dir).map_err(EngineError::Resource)? {
        let benchmark: T = read_json(&path)?;
        let name = benchmark.name().map(str::to_string).unwrap_or(stem);
        benchmarks.push((name, benchmark));
    }
    Ok(benchmarks)
}

/// Fraction of message pairs on which `actual` and `expected` agree about
/// sharing a conversation. Ids missing from a grouping count as singletons.
pub fn pair_agreement(ids: &[String], actual: &[Vec<String>], expected: &[Vec<String>]) -> f64 {
    if ids.len() < 2 {
        return 1.0;
    }
    fn group_of(groups: &[Vec<String>]) -> HashMap<&str, usize> {
        groups
            .iter()
            .enumerate()
            .flat_map(|(group, members)| members.iter().map(move |id| (id.as_str(), group)))
            .collect()
    }
    fn together(groups: &HashMap<&str, usize>, a: &str, b: &str) -> bool {
        matches!((groups.get(a), groups.get(b)), (Some(x), Some(y)) if x == y)
    }
    let actual = group_of(actual);
    let expected = group_of(expected);

    let mut pairs = 0usize;
    let mut agreeing = 0usize;
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            pairs += 1;
            if together(&actual, a, b) == together(&expected, a, b) {
                agreeing += 1;
            }
        }
    }
    agreeing as f64 / pairs as f64
}

pub struct LocalBenchmarkRunner {
    search_dir: PathBuf,
    conversation_dir: PathBuf,
}

impl LocalBenchmarkRunner {
    pub fn new(search_dir: PathBuf, conversation_dir: PathBuf) -> Self {
        Self {
            search_dir,
            conversation_dir,
        }
    }

    fn run_search(&self, config: &Value, resources: &SharedResources) -> Result<BTreeMap<String, f64>, EngineError> {
        let engine = LocalSearchEngine::from_config("benchmark", config)?;
        let mut scores = BTreeMap::new();
        for (name, benchmark) in load_all::<SearchBenchmark>(&self.search_dir)? {
            let score = Self::score_search(&engine, &benchmark, resources)?;
            debug!(benchmark = %name, score, "Search benchmark scored");
            scores.insert(name, score);
        }
        Ok(scores)
    }

    fn run_conversation_cut(&self, config: &Value) -> Result<BTreeMap<String, f64>, EngineError> {
        let engine = LocalConversationEngine::from_config("benchmark", config)?;
        let mut scores = BTreeMap::new();
        for (name, benchmark) in load_all::<ConversationBenchmark>(&self.conversation_dir)? {
            let score = Self::score_conversation_cut(&engine, &benchmark)?;
            debug!(benchmark = %name, score, "Conversation benchmark scored");
            scores.insert(name, score);
        }
        Ok(scores)
    }

    fn score_conversation_cut(
        engine: &dyn ConversationEngine,
        benchmark: &ConversationBenchmark,
    ) -> Result<f64, EngineError> {
        let mut messages: Vec<ChatMessage> = benchmark
            .messages
            .iter()
            .map(|m| ChatMessage {
                id: m.id.clone(),
                bubble_id: "benchmark".into(),
                author_id: m.author_id.clone(),
                content: m.content.clone(),
                date: m.date,
                answered_message_id: m.answered_message_id.clone(),
            })
            .collect();
        messages.sort_by_key(|m| m.date);

        let actual = engine.cut(&messages)?;
        let ids: Vec<String> = messages.into_iter().map(|m| m.id).collect();
        Ok(pair_agreement(&ids, &actual, &benchmark.expected))
    }

    fn score_search(
        engine: &dyn SearchEngine,
        benchmark: &SearchBenchmark,
        resources: &SharedResources,
    ) -> Result<f64, EngineError> {
        if benchmark.queries.is_empty() {
            return Ok(0.0);
        }
        let dataset = resources.dataset(&benchmark.dataset)?;
        let embeddings = resources.embedding_store(engine.embedding_model())?;
        let user = dataset.user(&benchmark.user_id).ok_or_else(|| {
            EngineError::InvalidInput(format!("unknown benchmark user `{}`", benchmark.user_id))
        })?;
        let settings = SearchSettings::default();

        let mut hits = 0usize;
        for query in &benchmark.queries {
            let results = engine.search(&SearchContext {
                dataset: dataset.as_ref(),
                query: &query.query,
                user: &user,
                settings: &settings,
                embeddings: embeddings.as_ref(),
            })?;
            if results
                .iter()
                .any(|hit| query.expected.contains(&hit.message.id))
            {
                hits += 1;
            }
        }
        Ok(hits as f64 / benchmark.queries.len() as f64)
    }
}

impl BenchmarkRunner for LocalBenchmarkRunner {
    fn run(
        &self,
        task: &str,
        config: &Value,
        resources: &SharedResources,
    ) -> Result<BTreeMap<String, f64>, EngineError> {
        match task {
            "search" => self.run_search(config, resources),
            "conversation_cut" => self.run_conversation_cut(config),
            _ => Err(EngineError::Unsupported(format!("benchmark task `{task}`"))),
        }
    }
}

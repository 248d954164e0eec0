//! Keyword + embedding similarity search.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use super::embedding::{cosine, tokenize};
use crate::cache::ResourceKind;
use crate::engines::{SearchContext, SearchEngine, SearchHit};
use crate::error::{EngineError, ResourceError};

/// Tunables read from a search engine configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub top_k: usize,
    pub min_score: f32,
    /// Share of the score given to keyword overlap; the rest is cosine
    /// similarity of embeddings.
    pub keyword_weight: f32,
    pub embedding_model: String,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.1,
            keyword_weight: 0.5,
            embedding_model: "hashing-256".to_string(),
        }
    }
}

pub struct LocalSearchEngine {
    name: String,
    config: Value,
    params: SearchParams,
}

impl LocalSearchEngine {
    pub fn from_config(name: &str, config: &Value) -> Result<Self, ResourceError> {
        let params: SearchParams =
            serde_json::from_value(config.clone()).map_err(|e| ResourceError::Invalid {
                kind: ResourceKind::SearchEngine,
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        if !(0.0..=1.0).contains(&params.keyword_weight) {
            return Err(ResourceError::Invalid {
                kind: ResourceKind::SearchEngine,
                name: name.to_string(),
                reason: format!("keyword_weight {} outside [0, 1]", params.keyword_weight),
            });
        }
        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            params,
        })
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }
}

impl SearchEngine for LocalSearchEngine {
    fn config_name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &Value {
        &self.config
    }

    fn embedding_model(&self) -> &str {
        &self.params.embedding_model
    }

    fn search(&self, ctx: &SearchContext<'_>) -> Result<Vec<SearchHit>, EngineError> {
        let query_tokens: HashSet<String> = tokenize(ctx.query).into_iter().collect();
        if query_tokens.is_empty() {
            return Err(EngineError::InvalidInput("empty search query".into()));
        }
        let query_vector = ctx.embeddings.embed(ctx.query);
        let weight = self.params.keyword_weight;

        let messages = ctx.dataset.messages();
        let readable: HashSet<&str> = messages
            .iter()
            .map(|m| m.bubble_id.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|bubble_id| !ctx.settings.exclude_bubbles.iter().any(|b| b.as_str() == *bubble_id))
            .filter(|bubble_id| {
                ctx.dataset
                    .bubble(bubble_id)
                    .is_some_and(|b| b.is_member(&ctx.user.id))
            })
            .collect();

        let mut hits: Vec<SearchHit> = messages
            .iter()
            .filter(|m| readable.contains(m.bubble_id.as_str()))
            .filter(|m| !ctx.settings.exclude_users.contains(&m.author_id))
            .filter_map(|message| {
                let tokens: HashSet<String> = tokenize(&message.content).into_iter().collect();
                let overlap = query_tokens.intersection(&tokens).count() as f32 / query_tokens.len() as f32;
                let similarity = cosine(&query_vector, &ctx.embeddings.embed(&message.content));
                let score = weight * overlap + (1.0 - weight) * similarity;
                (score >= self.params.min_score && score > 0.0).then(|| SearchHit {
                    message: message.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.message.date.cmp(&a.message.date))
        });
        let limit = ctx
            .settings
            .max_results
            .map_or(self.params.top_k, |max| max.min(self.params.top_k));
        hits.truncate(limit);
        Ok(hits)
    }
}

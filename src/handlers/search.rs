//! Semantic search.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::mismatch;
use crate::cache::SharedResources;
use crate::channels::OutboundMessage;
use crate::engines::SearchContext;
use crate::error::{EngineError, HandlerError};
use crate::task::{SearchRequest, TaskKind, TaskPayload, TaskRequest};
use crate::worker::{TaskHandler, WorkerId};

pub struct SearchHandler {
    resources: Arc<SharedResources>,
}

impl SearchHandler {
    pub fn new(resources: Arc<SharedResources>) -> Self {
        Self { resources }
    }

    fn cancel(request: &TaskRequest, search: &SearchRequest, reason: String) {
        warn!(client_id = %request.client_id(), query = %search.query, reason = %reason, "Search canceled");
        request.client().send(OutboundMessage::SearchCanceled {
            search_input: search.query.clone(),
            reason,
        });
    }
}

impl TaskHandler for SearchHandler {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        let TaskPayload::Search(search) = request.payload() else {
            return Err(mismatch(request, TaskKind::Search));
        };
        let client = request.client();

        let dataset = match self.resources.dataset(&search.dataset) {
            Ok(dataset) => dataset,
            Err(e) => {
                Self::cancel(request, search, e.to_string());
                return Ok(());
            }
        };
        let engine = match self.resources.search_engine(&search.engine) {
            Ok(engine) => engine,
            Err(e) => {
                Self::cancel(request, search, e.to_string());
                return Ok(());
            }
        };
        let Some(user) = dataset.user(&search.user_id) else {
            Self::cancel(request, search, format!("unknown user `{}`", search.user_id));
            return Ok(());
        };
        let embeddings = match self.resources.embedding_store(engine.embedding_model()) {
            Ok(store) => store,
            Err(e) => {
                Self::cancel(request, search, e.to_string());
                return Ok(());
            }
        };
        let query = match &search.settings.translate_to {
            Some(language) => match self.resources.translation_store(language) {
                Ok(store) => store.translate(&search.query),
                Err(e) => {
                    Self::cancel(request, search, e.to_string());
                    return Ok(());
                }
            },
            None => search.query.clone(),
        };

        client.send(OutboundMessage::SearchWillBeDone {
            search_input: search.query.clone(),
        });

        let started = Instant::now();
        let result = engine.search(&SearchContext {
            dataset: dataset.as_ref(),
            query: &query,
            user: &user,
            settings: &search.settings,
            embeddings: embeddings.as_ref(),
        });
        let hits = match result {
            Ok(hits) => hits,
            Err(EngineError::InvalidInput(reason)) => {
                Self::cancel(request, search, reason);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let search_time = started.elapsed().as_secs_f64();

        client.send(OutboundMessage::PrepareSearchResults {
            search_input: search.query.clone(),
            nb_results: hits.len(),
            search_msg_id: search.origin_message_id.clone(),
            search_msg_bubble_id: search.origin_bubble_id.clone(),
            search_time,
        });
        let nb_results = hits.len();
        for (rank, hit) in hits.into_iter().enumerate() {
            let author_name = dataset
                .user(&hit.message.author_id)
                .map(|u| u.name)
                .unwrap_or_default();
            let bubble_name = dataset
                .bubble(&hit.message.bubble_id)
                .map(|b| b.name)
                .unwrap_or_default();
            client.send(OutboundMessage::SearchResult {
                search_input: search.query.clone(),
                rank: rank + 1,
                score: hit.score,
                message_id: hit.message.id,
                content: hit.message.content,
                author_id: hit.message.author_id,
                author_name,
                bubble_id: hit.message.bubble_id,
                bubble_name,
                date: hit.message.date,
            });
        }

        info!(
            worker = %worker,
            dataset = %search.dataset,
            engine = %engine.config_name(),
            nb_results,
            search_time,
            "Search served"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ClientHandle;
    use crate::handlers::testing::{drain, fixture};
    use crate::task::SearchSettings;

    fn search(query: &str, user: &str, dataset: &str, engine: &str) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            user_id: user.into(),
            settings: SearchSettings::default(),
            engine: engine.into(),
            dataset: dataset.into(),
            origin_message_id: Some("origin".into()),
            origin_bubble_id: None,
        }
    }

    #[test]
    fn sends_announcement_summary_then_ranked_results() {
        let (_dir, resources) = fixture();
        let handler = SearchHandler::new(resources);
        let (client, mut rx) = ClientHandle::new("c");
        let request = TaskRequest::new(client, search("release date", "alice", "demo", "default"));

        handler.handle(WorkerId(0), &request).unwrap();
        let messages = drain(&mut rx);

        assert!(matches!(messages[0], OutboundMessage::SearchWillBeDone { .. }));
        let OutboundMessage::PrepareSearchResults { nb_results, search_msg_id, .. } = &messages[1] else {
            panic!("expected prepare_search_results, got {:?}", messages[1]);
        };
        assert_eq!(*nb_results, messages.len() - 2);
        assert_eq!(search_msg_id.as_deref(), Some("origin"));
        let OutboundMessage::SearchResult { rank, author_name, bubble_name, .. } = &messages[2] else {
            panic!("expected search_result, got {:?}", messages[2]);
        };
        assert_eq!(*rank, 1);
        assert!(!author_name.is_empty());
        assert_eq!(bubble_name, "General");
    }

    #[test]
    fn unknown_dataset_cancels() {
        let (_dir, resources) = fixture();
        let handler = SearchHandler::new(resources);
        let (client, mut rx) = ClientHandle::new("c");
        let request = TaskRequest::new(client, search("release", "alice", "missing", "default"));

        handler.handle(WorkerId(0), &request).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], OutboundMessage::SearchCanceled { reason, .. } if reason.contains("missing")));
    }

    #[test]
    fn unknown_engine_and_user_cancel() {
        let (_dir, resources) = fixture();
        let handler = SearchHandler::new(resources);
        let (client, mut rx) = ClientHandle::new("c");

        handler
            .handle(WorkerId(0), &TaskRequest::new(client.clone(), search("release", "alice", "demo", "nope")))
            .unwrap();
        handler
            .handle(WorkerId(0), &TaskRequest::new(client, search("release", "mallory", "demo", "default")))
            .unwrap();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| matches!(m, OutboundMessage::SearchCanceled { .. })));
    }
}

//! Bubble transcript import and live message insertion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use super::{HandlerSettings, mismatch};
use crate::cache::{Persist, SharedResources};
use crate::channels::{ClientHandle, OutboundMessage};
use crate::engines::{ChatDataset, EmbeddingStore, NewMessage, TranslationStore};
use crate::error::HandlerError;
use crate::task::{TaskKind, TaskPayload, TaskRequest};
use crate::worker::{TaskHandler, WorkerId};

/// Progress is reported every this many processed messages.
const PROGRESS_EVERY: usize = 10;

fn import_error(client: &ClientHandle, dataset: &str, bubble_name: &str, error: String) {
    warn!(dataset, bubble_name, error = %error, "Bubble import failed");
    client.send(OutboundMessage::BubbleImportError {
        dataset: dataset.to_string(),
        bubble_name: bubble_name.to_string(),
        error,
    });
}

/// Translate `text` and embed both the original and the translation.
fn enrich(text: &str, translations: &dyn TranslationStore, embeddings: &dyn EmbeddingStore) {
    let translated = translations.translate(text);
    embeddings.embed(text);
    if translated != text {
        embeddings.embed(&translated);
    }
}

pub struct BubbleImportHandler {
    resources: Arc<SharedResources>,
    settings: Arc<HandlerSettings>,
}

impl BubbleImportHandler {
    pub fn new(resources: Arc<SharedResources>, settings: Arc<HandlerSettings>) -> Self {
        Self { resources, settings }
    }

    fn author_ids(dataset: &dyn ChatDataset, names: impl Iterator<Item = String>) -> HashMap<String, String> {
        let mut ids = HashMap::new();
        for name in names {
            if ids.contains_key(&name) {
                continue;
            }
            let id = dataset
                .user_by_name(&name)
                .map(|u| u.id)
                .unwrap_or_else(|| format!("user-{}", Uuid::new_v4().simple()));
            ids.insert(name, id);
        }
        ids
    }
}

impl TaskHandler for BubbleImportHandler {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        let TaskPayload::BubbleImport(import) = request.payload() else {
            return Err(mismatch(request, TaskKind::BubbleImport));
        };
        let client = request.client();
        let fail = |error: String| import_error(client, &import.dataset, &import.bubble_name, error);

        let dataset = match self.resources.dataset_or_create(&import.dataset) {
            Ok(dataset) => dataset,
            Err(e) => {
                fail(e.to_string());
                return Ok(());
            }
        };
        let parsed = match self.resources.backend().parse_bubble_text(&import.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                fail(e.to_string());
                return Ok(());
            }
        };
        let translations = match self.resources.translation_store(&self.settings.import_language) {
            Ok(store) => store,
            Err(e) => {
                fail(e.to_string());
                return Ok(());
            }
        };
        let embeddings = match self.resources.embedding_store(&self.settings.import_embedding_model) {
            Ok(store) => store,
            Err(e) => {
                fail(e.to_string());
                return Ok(());
            }
        };

        let total = parsed.len();
        client.send(OutboundMessage::BubbleImportStarted {
            dataset: import.dataset.clone(),
            bubble_name: import.bubble_name.clone(),
            nb_msgs: total,
            estimated_time: 0.0,
        });

        let bubble = match dataset.bubble_by_name(&import.bubble_name) {
            Some(bubble) => bubble,
            None => {
                let id = format!("bubble-{}", Uuid::new_v4().simple());
                dataset.create_bubble(&id, &import.bubble_name)
            }
        };
        let authors = Self::author_ids(dataset.as_ref(), parsed.iter().map(|m| m.author_name.clone()));

        let started = Instant::now();
        let mut messages = Vec::with_capacity(total);
        for (index, imported) in parsed.into_iter().enumerate() {
            enrich(&imported.content, translations.as_ref(), embeddings.as_ref());

            let processed = index + 1;
            if processed % PROGRESS_EVERY == 0 || processed == total {
                let per_message = started.elapsed().as_secs_f64() / processed as f64;
                client.send(OutboundMessage::BubbleImportProgressUpdate {
                    dataset: import.dataset.clone(),
                    bubble_name: import.bubble_name.clone(),
                    msgs_processed: processed,
                    estimated_time: per_message * (total - processed) as f64,
                });
            }

            let author_id = authors
                .get(&imported.author_name)
                .cloned()
                .unwrap_or_default();
            messages.push(NewMessage {
                id: Uuid::new_v4().to_string(),
                author_id,
                author_name: imported.author_name,
                content: imported.content,
                date: imported.date,
                answered_message_id: None,
            });
        }

        let inserted = dataset.insert_messages(&bubble.id, messages)?;
        if let Err(e) = dataset.flush() {
            fail(e.to_string());
            return Ok(());
        }

        info!(
            worker = %worker,
            dataset = %import.dataset,
            bubble_id = %bubble.id,
            inserted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bubble imported"
        );
        client.send(OutboundMessage::BubbleImportFinished {
            dataset: import.dataset.clone(),
            bubble_name: import.bubble_name.clone(),
            bubble_id: bubble.id.clone(),
        });
        let summary = dataset.summary();
        client.send(OutboundMessage::DatasetInfo {
            dataset: summary.name,
            nb_bubbles: summary.nb_bubbles,
            nb_users: summary.nb_users,
            nb_messages: summary.nb_messages,
        });
        Ok(())
    }
}

pub struct AddMessagesHandler {
    resources: Arc<SharedResources>,
    settings: Arc<HandlerSettings>,
}

impl AddMessagesHandler {
    pub fn new(resources: Arc<SharedResources>, settings: Arc<HandlerSettings>) -> Self {
        Self { resources, settings }
    }

    /// Best-effort warm-up of the import caches.
    fn warm_caches(&self, contents: &[String]) {
        let translations = self.resources.translation_store(&self.settings.import_language);
        let embeddings = self.resources.embedding_store(&self.settings.import_embedding_model);
        match (translations, embeddings) {
            (Ok(translations), Ok(embeddings)) => {
                for content in contents {
                    enrich(content, translations.as_ref(), embeddings.as_ref());
                }
            }
            (Err(e), _) | (_, Err(e)) => warn!(error = %e, "Skipping cache warm-up"),
        }
    }
}

impl TaskHandler for AddMessagesHandler {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        let TaskPayload::AddMessages(add) = request.payload() else {
            return Err(mismatch(request, TaskKind::AddMessages));
        };
        let client = request.client();

        let dataset = match self.resources.dataset_or_create(&add.dataset) {
            Ok(dataset) => dataset,
            Err(e) => {
                import_error(client, &add.dataset, &add.bubble_id, e.to_string());
                return Ok(());
            }
        };

        let bubble_name = add
            .messages
            .iter()
            .find_map(|m| m.bubble_name.clone())
            .unwrap_or_else(|| add.bubble_id.clone());
        dataset.create_bubble(&add.bubble_id, &bubble_name);

        let contents: Vec<String> = add.messages.iter().map(|m| m.content.clone()).collect();
        let messages = add
            .messages
            .iter()
            .map(|m| NewMessage {
                id: m.id.clone(),
                author_id: m.author_id.clone(),
                author_name: m
                    .author_name
                    .clone()
                    .or_else(|| dataset.user(&m.author_id).map(|u| u.name))
                    .unwrap_or_else(|| m.author_id.clone()),
                content: m.content.clone(),
                date: m.date,
                answered_message_id: m.answered_message_id.clone(),
            })
            .collect();
        let inserted = dataset.insert_messages(&add.bubble_id, messages)?;
        self.warm_caches(&contents);

        if let Err(e) = dataset.flush() {
            import_error(client, &add.dataset, &bubble_name, e.to_string());
            return Ok(());
        }

        info!(worker = %worker, dataset = %add.dataset, bubble_id = %add.bubble_id, inserted, "Messages added");
        client.send(OutboundMessage::MessagesAdded {
            dataset: add.dataset.clone(),
            bubble_id: add.bubble_id.clone(),
            nb_added: inserted,
        });
        Ok(())
    }
}

//! Conversation segmentation of one bubble.

use std::sync::Arc;

use tracing::{info, warn};

use super::{HandlerSettings, mismatch};
use crate::cache::SharedResources;
use crate::channels::OutboundMessage;
use crate::error::HandlerError;
use crate::task::{ConversationCutRequest, TaskKind, TaskPayload, TaskRequest};
use crate::worker::{TaskHandler, WorkerId};

pub struct ConversationCutHandler {
    resources: Arc<SharedResources>,
    settings: Arc<HandlerSettings>,
}

impl ConversationCutHandler {
    pub fn new(resources: Arc<SharedResources>, settings: Arc<HandlerSettings>) -> Self {
        Self { resources, settings }
    }

    fn cancel(request: &TaskRequest, cut: &ConversationCutRequest, reason: String) {
        warn!(dataset = %cut.dataset, bubble_id = %cut.bubble_id, reason = %reason, "Conversation cut canceled");
        request.client().send(OutboundMessage::ConversationCutCanceled {
            dataset: cut.dataset.clone(),
            bubble_id: cut.bubble_id.clone(),
            reason,
        });
    }
}

impl TaskHandler for ConversationCutHandler {
    fn handle(&self, worker: WorkerId, request: &TaskRequest) -> Result<(), HandlerError> {
        let TaskPayload::ConversationCut(cut) = request.payload() else {
            return Err(mismatch(request, TaskKind::ConversationCut));
        };

        let dataset = match self.resources.dataset(&cut.dataset) {
            Ok(dataset) => dataset,
            Err(e) => {
                Self::cancel(request, cut, e.to_string());
                return Ok(());
            }
        };
        if dataset.bubble(&cut.bubble_id).is_none() {
            Self::cancel(request, cut, format!("unknown bubble `{}`", cut.bubble_id));
            return Ok(());
        }
        let engine = match self.resources.conversation_engine(&self.settings.conversation_engine) {
            Ok(engine) => engine,
            Err(e) => {
                Self::cancel(request, cut, e.to_string());
                return Ok(());
            }
        };

        let messages = dataset.bubble_messages(&cut.bubble_id);
        let conversations = match engine.cut(&messages) {
            Ok(conversations) => conversations,
            Err(e) => {
                Self::cancel(request, cut, e.to_string());
                return Ok(());
            }
        };

        info!(
            worker = %worker,
            dataset = %cut.dataset,
            bubble_id = %cut.bubble_id,
            messages = messages.len(),
            conversations = conversations.len(),
            "Conversation cut done"
        );
        request.client().send(OutboundMessage::ConversationCutResults {
            dataset: cut.dataset.clone(),
            bubble_id: cut.bubble_id.clone(),
            conversations,
        });
        Ok(())
    }
}

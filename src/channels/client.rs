//! Per-connection handle used by workers to reach a client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::message::OutboundMessage;

/// Routes outbound messages to one connected client.
///
/// The front end owns the receiving half and drains it into its socket;
/// workers only ever push. Sending never blocks, so a worker thread can
/// report progress without touching the async runtime.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: Arc<str>,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ClientHandle {
    /// Create a handle and the receiver the front end drains.
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id: String = id.into();
        (Self { id: id.into(), tx }, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for the client. Returns `false` once the client is gone.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(err) => {
                debug!(client_id = %self.id, message = err.0.type_name(), "Client gone, dropping message");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

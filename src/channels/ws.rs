//! WebSocket front end for the browser client.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::FrontendContext;
use super::{ClientHandle, OutboundMessage};

/// Build the Axum router serving `/ws` and `/health`.
pub fn ws_routes(ctx: Arc<FrontendContext>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(ctx)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(ctx): State<Arc<FrontendContext>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatsift",
        "closing": ctx.dispatcher.is_closing(),
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<Arc<FrontendContext>>) -> impl IntoResponse {
    debug!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, ctx))
}

async fn send_json(socket: &mut WebSocket, message: &OutboundMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, message = message.type_name(), "Failed to serialize message");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<FrontendContext>) {
    let client_id = Uuid::new_v4().to_string();
    info!(client_id = %client_id, "WebSocket client connected");

    let (client, mut rx) = ClientHandle::new(client_id.clone());
    client.send(OutboundMessage::Connected {
        client_id: client_id.clone(),
    });

    // Dataset loading may hit the disk.
    let welcome_ctx = Arc::clone(&ctx);
    match tokio::task::spawn_blocking(move || welcome_ctx.welcome_messages()).await {
        Ok(messages) => {
            for message in messages {
                client.send(message);
            }
        }
        Err(e) => warn!(client_id = %client_id, error = %e, "Failed to build welcome messages"),
    }

    loop {
        tokio::select! {
            // Forward worker output to this client
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                if !send_json(&mut socket, &message).await {
                    debug!(client_id = %client_id, "Client disconnected during send");
                    break;
                }
            }

            // Receive requests from client
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => ctx.handle_text(&text, &client),
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client_id = %client_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

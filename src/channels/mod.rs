//! Front ends: a raw TCP socket bridge and a WebSocket server.
//!
//! Both are thin adapters. They decode inbound JSON, answer pings inline
//! and hand everything else to the [`crate::worker::Dispatcher`]. Replies
//! flow back through each connection's [`ClientHandle`].

pub mod client;
pub mod message;
pub mod protocol;
pub mod socket;
pub mod ws;

pub use client::ClientHandle;
pub use message::OutboundMessage;
pub use protocol::{FrontendContext, InboundMessage, NewMessageEvent};
pub use socket::SocketBridge;
pub use ws::ws_routes;

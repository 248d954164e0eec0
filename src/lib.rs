//! Chatsift — task dispatch and worker pool for chat semantic search.

pub mod backend;
pub mod cache;
pub mod channels;
pub mod config;
pub mod engines;
pub mod error;
pub mod handlers;
pub mod task;
pub mod worker;

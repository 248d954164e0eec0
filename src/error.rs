//! Error types for chatsift.

use uuid::Uuid;

use crate::cache::ResourceKind;
use crate::task::TaskKind;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Dedicated workers ({dedicated}) exceed the pool size ({workers})")]
    TooManyDedicated { dedicated: usize, workers: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker pool lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to construct or persist a shared resource.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("{kind} `{name}` not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("Failed to load {kind} `{name}`: {reason}")]
    Load {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("Invalid {kind} `{name}`: {reason}")]
    Invalid {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures raised by the long-running collaborators while they run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Engine failed: {0}")]
    Failed(String),

    #[error("Resource unavailable: {0}")]
    Resource(#[from] ResourceError),
}

/// Faults raised while a worker executes a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("No handler registered for {0}")]
    NotRegistered(TaskKind),

    #[error("Request {id} is not a {expected} request")]
    PayloadMismatch { id: Uuid, expected: TaskKind },

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Front-end transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Client {client_id} disconnected")]
    Disconnected { client_id: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

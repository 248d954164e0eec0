//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::handlers::HandlerSettings;
use crate::task::TaskKind;
use crate::worker::Affinity;

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total number of worker threads.
    pub workers: usize,
    /// Workers restricted to a single kind. The rest are generalists.
    pub dedicated: BTreeMap<TaskKind, usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dedicated: BTreeMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn dedicated_total(&self) -> usize {
        self.dedicated.values().sum()
    }

    /// Workers left over once dedicated ones are carved out.
    pub fn generalists(&self) -> usize {
        self.workers.saturating_sub(self.dedicated_total())
    }

    /// Check the sizing against the kinds that have a handler.
    pub fn validate(&self, declared: &[TaskKind]) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers".into(),
                message: "the pool needs at least one worker".into(),
            });
        }
        let dedicated = self.dedicated_total();
        if dedicated > self.workers {
            return Err(ConfigError::TooManyDedicated {
                dedicated,
                workers: self.workers,
            });
        }
        if let Some(kind) = self
            .dedicated
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(kind, _)| kind)
            .find(|kind| !declared.contains(kind))
        {
            return Err(ConfigError::InvalidValue {
                key: "dedicated".into(),
                message: format!("workers dedicated to `{kind}` but no handler is registered for it"),
            });
        }
        Ok(())
    }

    /// One affinity per worker: dedicated workers first, in kind order,
    /// then generalists.
    pub fn worker_affinities(&self) -> Vec<Affinity> {
        let mut affinities: Vec<Affinity> = self
            .dedicated
            .iter()
            .flat_map(|(kind, count)| std::iter::repeat_n(*kind, *count))
            .map(|kind| Affinity::only([kind]))
            .collect();
        affinities.extend(std::iter::repeat_with(Affinity::any).take(self.generalists()));
        affinities
    }

    /// Parse `"bubble_import=1,search=2"`.
    pub fn parse_dedicated(value: &str) -> Result<BTreeMap<TaskKind, usize>, ConfigError> {
        let mut dedicated = BTreeMap::new();
        for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (kind, count) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "dedicated".into(),
                message: format!("expected `kind=count`, got `{entry}`"),
            })?;
            let kind = TaskKind::from_str(kind)?;
            let count: usize = count.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "dedicated".into(),
                message: format!("invalid worker count in `{entry}`"),
            })?;
            *dedicated.entry(kind).or_insert(0) += count;
        }
        Ok(dedicated)
    }
}

/// Process configuration, read from `CHATSIFT_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pool: PoolConfig,
    /// Root of the local backend.
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub socket_port: u16,
    pub ws_port: u16,
    /// Separates JSON frames on the raw socket.
    pub socket_delimiter: String,
    pub default_search_engine: String,
    pub default_conversation_engine: String,
    pub import_embedding_model: String,
    pub import_language: String,
    /// Bot accounts never returned by `/search` chat commands.
    pub excluded_users: Vec<String>,
    /// Daily-rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            data_dir: PathBuf::from("./data"),
            bind_addr: "0.0.0.0".to_string(),
            socket_port: 5000,
            ws_port: 8765,
            socket_delimiter: "\n".to_string(),
            default_search_engine: "default".to_string(),
            default_conversation_engine: "default".to_string(),
            import_embedding_model: "hashing-256".to_string(),
            import_language: "en".to_string(),
            excluded_users: Vec::new(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workers = parse_or(var("CHATSIFT_WORKERS"), "CHATSIFT_WORKERS", defaults.pool.workers)?;
        let dedicated = match var("CHATSIFT_DEDICATED_WORKERS") {
            Some(value) => PoolConfig::parse_dedicated(&value)?,
            None => BTreeMap::new(),
        };
        let socket_delimiter = match lookup("CHATSIFT_SOCKET_DELIMITER") {
            Some(value) if value.is_empty() => {
                return Err(ConfigError::InvalidValue {
                    key: "CHATSIFT_SOCKET_DELIMITER".into(),
                    message: "must not be empty".into(),
                });
            }
            Some(value) => unescape(&value),
            None => defaults.socket_delimiter,
        };

        let excluded_users: Vec<String> = var("CHATSIFT_EXCLUDED_USERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            pool: PoolConfig { workers, dedicated },
            data_dir: var("CHATSIFT_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            bind_addr: var("CHATSIFT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            socket_port: parse_or(var("CHATSIFT_SOCKET_PORT"), "CHATSIFT_SOCKET_PORT", defaults.socket_port)?,
            ws_port: parse_or(var("CHATSIFT_WS_PORT"), "CHATSIFT_WS_PORT", defaults.ws_port)?,
            socket_delimiter,
            default_search_engine: var("CHATSIFT_DEFAULT_SEARCH_ENGINE")
                .unwrap_or(defaults.default_search_engine),
            default_conversation_engine: var("CHATSIFT_DEFAULT_CONVERSATION_ENGINE")
                .unwrap_or(defaults.default_conversation_engine),
            import_embedding_model: var("CHATSIFT_IMPORT_EMBEDDING_MODEL")
                .unwrap_or(defaults.import_embedding_model),
            import_language: var("CHATSIFT_IMPORT_LANGUAGE").unwrap_or(defaults.import_language),
            excluded_users,
            log_dir: var("CHATSIFT_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            conversation_engine: self.default_conversation_engine.clone(),
            import_embedding_model: self.import_embedding_model.clone(),
            import_language: self.import_language.clone(),
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.socket_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.ws_port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse `{raw}`"),
        }),
        None => Ok(default),
    }
}

/// Env vars cannot easily carry control characters, so accept `\n`, `\r`
/// and `\t` escapes.
fn unescape(value: &str) -> String {
    value.replace("\\n", "\n").replace("\\r", "\r").replace("\\t", "\t")
}

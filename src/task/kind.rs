//! Task kind tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Discriminator for a task request: selects its queue and its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Search,
    ConversationCut,
    BubbleImport,
    BenchmarkTest,
    HyperParamOptimization,
    AddMessages,
}

impl TaskKind {
    /// Every kind, in the fixed order workers scan their queues.
    pub const ALL: [TaskKind; 6] = [
        TaskKind::Search,
        TaskKind::ConversationCut,
        TaskKind::BubbleImport,
        TaskKind::BenchmarkTest,
        TaskKind::HyperParamOptimization,
        TaskKind::AddMessages,
    ];

    /// Wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ConversationCut => "conversation_cut",
            Self::BubbleImport => "bubble_import",
            Self::BenchmarkTest => "benchmark_test",
            Self::HyperParamOptimization => "hyper_param_optimization",
            Self::AddMessages => "add_messages",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownTaskKind(s.to_string()))
    }
}

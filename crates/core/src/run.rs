//! Runs: the units of work handlers observe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::RunId;

/// Category of a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Chain,
    Llm,
    Tool,
    Retriever,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunKind::Chain => "chain",
            RunKind::Llm => "llm",
            RunKind::Tool => "tool",
            RunKind::Retriever => "retriever",
        }
    }
}

/// Snapshot of a run handed to every handler callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub parent_id: Option<RunId>,
    pub name: String,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl Run {
    pub fn new(name: impl Into<String>, kind: RunKind) -> Self {
        Self {
            id: RunId::new(),
            parent_id: None,
            name: name.into(),
            kind,
            started_at: Utc::now(),
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: Option<RunId>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequence number for ordering change notifications
pub type EventSequence = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// One row-level change pushed by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub collection: String,
    pub kind: ChangeKind,
    pub resource_id: String,
    /// Row before the change; absent for inserts
    pub old: Option<Value>,
    pub new: Value,
}

impl ChangeEvent {
    pub fn payload_type(&self) -> &str {
        match self.kind {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
        }
    }
}

/// Server-side subscription filter. An empty `kinds` list matches every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub kinds: Vec<ChangeKind>,
    pub resource_id: Option<String>,
}

impl FeedFilter {
    pub fn new(kinds: impl Into<Vec<ChangeKind>>) -> Self {
        Self {
            kinds: kinds.into(),
            resource_id: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&event.kind);
        let id_ok = self
            .resource_id
            .as_deref()
            .map_or(true, |id| id == event.resource_id);
        kind_ok && id_ok
    }
}

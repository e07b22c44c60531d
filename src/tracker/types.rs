use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    #[default]
    Idle,
    Initializing,
    Watching,
    Completed,
    Errored,
}

impl WatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WatchStatus::Completed | WatchStatus::Errored)
    }
}

/// What a UI layer renders for one watch session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WatchSnapshot {
    pub resource_id: Option<String>,
    pub status: WatchStatus,
    pub baseline_metric: Option<i64>,
    pub completed: bool,
    pub error: Option<String>,
}

impl WatchSnapshot {
    pub(super) fn initializing(resource_id: &str) -> Self {
        Self {
            resource_id: Some(resource_id.to_string()),
            status: WatchStatus::Initializing,
            ..Self::default()
        }
    }
}

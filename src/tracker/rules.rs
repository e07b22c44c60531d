//! Completion rules decide when a watched row counts as "done".

use crate::events::ChangeKind;
use serde_json::Value;

pub trait CompletionRule: Send + Sync + 'static {
    /// Change kinds the session subscribes to
    fn kinds(&self) -> Vec<ChangeKind>;

    /// Metric carried by a row, `None` when the row has no usable value
    fn metric(&self, record: &Value) -> Option<i64>;

    /// Baseline taken from the row as it exists when watching starts.
    /// A missing row counts as zero.
    fn baseline(&self, current: Option<&Value>) -> Option<i64> {
        match current {
            Some(record) => self.metric(record),
            None => Some(0),
        }
    }

    fn is_satisfied(&self, baseline: i64, _old: Option<&Value>, new: &Value) -> bool {
        self.metric(new).is_some_and(|metric| metric > baseline)
    }
}

/// A counted field on the row grew past the baseline (array length or integer).
#[derive(Debug, Clone)]
pub struct SubItemGrowth {
    pointer: String,
}

impl SubItemGrowth {
    /// `field` is a top-level key or a JSON pointer such as `/media/images`
    pub fn new(field: &str) -> Self {
        let pointer = if field.starts_with('/') {
            field.to_string()
        } else {
            format!("/{}", field)
        };
        Self { pointer }
    }
}

impl CompletionRule for SubItemGrowth {
    fn kinds(&self) -> Vec<ChangeKind> {
        vec![ChangeKind::Insert, ChangeKind::Update]
    }

    fn metric(&self, record: &Value) -> Option<i64> {
        match record.pointer(&self.pointer) {
            None | Some(Value::Null) => Some(0),
            Some(Value::Array(items)) => i64::try_from(items.len()).ok(),
            Some(Value::Number(n)) => n.as_i64(),
            Some(_) => None,
        }
    }
}

/// A row for the resource appeared where none existed when watching began.
#[derive(Debug, Clone, Default)]
pub struct RecordInserted;

impl CompletionRule for RecordInserted {
    fn kinds(&self) -> Vec<ChangeKind> {
        vec![ChangeKind::Insert]
    }

    fn metric(&self, _record: &Value) -> Option<i64> {
        Some(1)
    }
}

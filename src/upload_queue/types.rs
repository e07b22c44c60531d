//! Type definitions for the upload queue.
//!
//! Defines UploadItem, its status machine, and the aggregate QueueSummary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transfer::LocalFile;

pub const PROGRESS_COMPLETE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Uploading,
    Success,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Error)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadItem {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub destination: String,
    pub progress_percent: u8,
    pub bytes_sent: u64,
    pub status: ItemStatus,
    pub error_detail: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub(crate) fn new(file: &LocalFile, destination: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: file.name.clone(),
            size_bytes: file.size_bytes,
            destination: destination.to_string(),
            progress_percent: 0,
            bytes_sent: 0,
            status: ItemStatus::Pending,
            error_detail: None,
            queued_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Pending -> Uploading. False if the item already left pending.
    pub(crate) fn begin(&mut self) -> bool {
        if self.status != ItemStatus::Pending {
            return false;
        }
        self.status = ItemStatus::Uploading;
        true
    }

    /// Apply a progress tick. Ignored unless uploading; never moves backwards.
    pub(crate) fn record_progress(&mut self, sent: u64, total: u64) -> bool {
        if self.status != ItemStatus::Uploading {
            return false;
        }
        let percent = percent_of(sent, total);
        if percent < self.progress_percent && sent <= self.bytes_sent {
            return false;
        }
        self.bytes_sent = self.bytes_sent.max(sent);
        self.progress_percent = self.progress_percent.max(percent);
        true
    }

    pub(crate) fn succeed(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ItemStatus::Success;
        self.progress_percent = PROGRESS_COMPLETE;
        self.bytes_sent = self.size_bytes;
        self.finished_at = Some(Utc::now());
        true
    }

    pub(crate) fn fail(&mut self, detail: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ItemStatus::Error;
        self.error_detail = Some(detail);
        self.finished_at = Some(Utc::now());
        true
    }
}

/// `round(sent / total * 100)`, clamped to 0..=100. An empty total reports 0
/// until the item succeeds.
pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = ((sent as f64 / total as f64) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub uploading: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    /// Byte-weighted progress across every visible item
    pub overall_percent: u8,
}

impl QueueSummary {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a UploadItem>) -> Self {
        let mut summary = QueueSummary::default();
        for item in items {
            match item.status {
                ItemStatus::Pending => summary.pending += 1,
                ItemStatus::Uploading => summary.uploading += 1,
                ItemStatus::Success => summary.succeeded += 1,
                ItemStatus::Error => summary.failed += 1,
            }
            summary.total_bytes += item.size_bytes;
            summary.bytes_sent += item.bytes_sent.min(item.size_bytes);
        }

        let finished = summary.succeeded + summary.failed;
        summary.overall_percent = if summary.total_bytes > 0 {
            percent_of(summary.bytes_sent, summary.total_bytes)
        } else if finished > 0 && summary.pending + summary.uploading == 0 {
            PROGRESS_COMPLETE
        } else {
            0
        };
        summary
    }

    pub fn is_busy(&self) -> bool {
        self.pending + self.uploading > 0
    }
}

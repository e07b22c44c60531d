//! Transfer execution for a single upload item.
//!
//! Each item runs as its own task so one slow or failing transfer never holds
//! up its peers. The task is the only writer of its item's status after
//! creation, which keeps progress ticks ordered before the terminal update.

use crate::inventory::FileInventory;
use crate::logging::{log_info, log_warn, log_with_details};
use crate::transfer::{LocalFile, ProgressFn, TransferEndpoint, TransferError, TransferResponse};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use super::types::UploadItem;

pub(super) const COMPONENT: &str = "upload-queue";

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared pieces of the queue every transfer task needs
#[derive(Clone)]
pub(super) struct QueueShared {
    pub(super) items: Arc<Mutex<Vec<UploadItem>>>,
    pub(super) cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
    pub(super) changes: Arc<watch::Sender<u64>>,
    pub(super) endpoint: Arc<dyn TransferEndpoint>,
    pub(super) inventory: FileInventory,
    pub(super) upload_semaphore: Option<Arc<Semaphore>>,
}

impl QueueShared {
    pub(super) fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Mutate one item in place; returns what `f` returned, or false if the
    /// item has been cleared from the visible set.
    pub(super) fn update(&self, item_id: &str, f: impl FnOnce(&mut UploadItem) -> bool) -> bool {
        let changed = {
            let mut items = lock(&self.items);
            items
                .iter_mut()
                .find(|item| item.id == item_id)
                .map(f)
                .unwrap_or(false)
        };
        if changed {
            self.notify();
        }
        changed
    }
}

pub(super) struct TransferTask {
    pub(super) item_id: String,
    pub(super) file: LocalFile,
    pub(super) destination: String,
    pub(super) cancel: CancellationToken,
    pub(super) shared: QueueShared,
}

impl TransferTask {
    pub(super) async fn run(self) {
        let result = self.transfer().await;
        self.finish(result).await;
        lock(&self.shared.cancellations).remove(&self.item_id);
    }

    async fn transfer(&self) -> Result<TransferResponse, TransferError> {
        // Wait for a slot when the queue is bounded
        let _permit = match &self.shared.upload_semaphore {
            Some(semaphore) => {
                let permit = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                    permit = Arc::clone(semaphore).acquire_owned() => permit,
                };
                Some(permit.map_err(|_| TransferError::Network("upload queue closed".to_string()))?)
            }
            None => None,
        };

        if !self.shared.update(&self.item_id, UploadItem::begin) {
            return Err(TransferError::Cancelled);
        }

        log_info(
            COMPONENT,
            &format!(
                "📤 Uploading {} to {} ({} bytes)",
                self.file.name, self.destination, self.file.size_bytes
            ),
        )
        .unwrap_or_default();

        let progress: ProgressFn = {
            let shared = self.shared.clone();
            let item_id = self.item_id.clone();
            Arc::new(move |sent, total| {
                if shared.update(&item_id, |item| item.record_progress(sent, total)) {
                    tracing::debug!(
                        component = COMPONENT,
                        item = %item_id,
                        sent,
                        total,
                        "upload progress"
                    );
                }
            })
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.shared.endpoint.upload(&self.destination, &self.file, progress) => {
                result.and_then(TransferResponse::into_result)
            }
        }
    }

    async fn finish(&self, result: Result<TransferResponse, TransferError>) {
        match result {
            Ok(_) => {
                self.shared.update(&self.item_id, UploadItem::succeed);

                log_info(
                    COMPONENT,
                    &format!(
                        "✓ Upload successful: {} (size: {} bytes)",
                        self.file.name, self.file.size_bytes
                    ),
                )
                .unwrap_or_default();

                if let Err(e) = self
                    .shared
                    .inventory
                    .refresh_if_showing(&self.destination)
                    .await
                {
                    log_warn(
                        COMPONENT,
                        &format!("⚠ Listing refresh after {} failed: {}", self.file.name, e),
                    )
                    .unwrap_or_default();
                }
            }
            Err(e) => {
                let detail = match &e {
                    TransferError::Cancelled => "Upload cancelled".to_string(),
                    other => format!("Upload failed: {}", other),
                };
                self.shared
                    .update(&self.item_id, |item| item.fail(detail.clone()));

                log_with_details(
                    COMPONENT,
                    "ERROR",
                    &format!("✗ Upload failed: {} - Error: {}", self.file.name, detail),
                    json!({
                        "itemId": self.item_id,
                        "destination": self.destination,
                        "status": e.status(),
                    }),
                )
                .unwrap_or_default();
            }
        }
    }
}

// Module declarations
mod processor;
mod types;

pub use types::*;

use crate::config::ContentDeskConfig;
use crate::error::Result;
use crate::inventory::FileInventory;
use crate::logging::log_info;
use crate::transfer::{LocalFile, TransferEndpoint};
use processor::{lock, QueueShared, TransferTask, COMPONENT};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

/// Parallel uploads into one destination path, with per-item status.
#[derive(Clone)]
pub struct UploadQueue {
    shared: QueueShared,
    destination: Arc<Mutex<String>>,
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("items", &"<upload items>")
            .field("destination", &self.destination())
            .field("endpoint", &"<transfer endpoint>")
            .field("upload_semaphore", &self.shared.upload_semaphore)
            .finish()
    }
}

impl UploadQueue {
    /// `max_concurrent` of `None` starts every enqueued transfer at once.
    pub fn new(
        endpoint: Arc<dyn TransferEndpoint>,
        inventory: FileInventory,
        destination: impl Into<String>,
        max_concurrent: Option<usize>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: QueueShared {
                items: Arc::new(Mutex::new(Vec::new())),
                cancellations: Arc::new(Mutex::new(HashMap::new())),
                changes: Arc::new(changes),
                endpoint,
                inventory,
                upload_semaphore: max_concurrent.map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            },
            destination: Arc::new(Mutex::new(destination.into())),
        }
    }

    pub fn from_config(
        endpoint: Arc<dyn TransferEndpoint>,
        inventory: FileInventory,
        destination: impl Into<String>,
        config: &ContentDeskConfig,
    ) -> Self {
        Self::new(endpoint, inventory, destination, config.max_concurrent_uploads)
    }

    pub fn destination(&self) -> String {
        lock(&self.destination).clone()
    }

    /// Items already enqueued keep the destination they were created with
    pub fn set_destination(&self, path: impl Into<String>) {
        *lock(&self.destination) = path.into();
    }

    /// Create one pending item per file and start its transfer immediately.
    /// Returns the new item ids in input order. Outside a Tokio runtime the
    /// items fail immediately.
    pub fn enqueue(&self, files: Vec<LocalFile>) -> Vec<String> {
        let destination = self.destination();
        let mut tasks = Vec::with_capacity(files.len());

        {
            let mut items = lock(&self.shared.items);
            let mut cancellations = lock(&self.shared.cancellations);

            for file in files {
                let item = UploadItem::new(&file, &destination);
                let cancel = CancellationToken::new();
                cancellations.insert(item.id.clone(), cancel.clone());

                tasks.push(TransferTask {
                    item_id: item.id.clone(),
                    file,
                    destination: destination.clone(),
                    cancel,
                    shared: self.shared.clone(),
                });
                items.push(item);
            }
        }
        self.shared.notify();

        if !tasks.is_empty() {
            log_info(
                COMPONENT,
                &format!("📥 Queued {} file(s) for {}", tasks.len(), destination),
            )
            .unwrap_or_default();
        }

        let runtime = tokio::runtime::Handle::try_current().ok();
        tasks
            .into_iter()
            .map(|task| {
                let id = task.item_id.clone();
                match &runtime {
                    Some(handle) => {
                        handle.spawn(task.run());
                    }
                    None => {
                        lock(&self.shared.cancellations).remove(&id);
                        self.shared.update(&id, |item| {
                            item.fail("No async runtime available".to_string())
                        });
                    }
                }
                id
            })
            .collect()
    }

    pub fn items(&self) -> Vec<UploadItem> {
        lock(&self.shared.items).clone()
    }

    pub fn item(&self, item_id: &str) -> Option<UploadItem> {
        lock(&self.shared.items)
            .iter()
            .find(|item| item.id == item_id)
            .cloned()
    }

    pub fn summary(&self) -> QueueSummary {
        QueueSummary::from_items(lock(&self.shared.items).iter())
    }

    /// True while any item is pending or uploading
    pub fn is_busy(&self) -> bool {
        lock(&self.shared.items)
            .iter()
            .any(|item| item.status.is_active())
    }

    /// Drop finished items from the visible set; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        let removed = {
            let mut items = lock(&self.shared.items);
            let before = items.len();
            items.retain(|item| item.status.is_active());
            before - items.len()
        };
        if removed > 0 {
            self.shared.notify();
        }
        removed
    }

    /// Abort one pending or uploading item. It settles in `Error`.
    pub fn cancel(&self, item_id: &str) -> bool {
        match lock(&self.shared.cancellations).get(item_id) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for cancel in lock(&self.shared.cancellations).values() {
            cancel.cancel();
        }
    }

    /// Delete `filename` from the destination path and drop it from the inventory
    pub async fn remove(&self, filename: &str) -> Result<()> {
        let destination = self.destination();
        self.shared.inventory.delete(&destination, filename).await
    }

    pub fn inventory(&self) -> &FileInventory {
        &self.shared.inventory
    }

    /// Version counter bumped on every item change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Resolve once no item is pending or uploading
    pub async fn wait_idle(&self) {
        let mut changes = self.subscribe();
        while self.is_busy() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

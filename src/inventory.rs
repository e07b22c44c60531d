//! Reconciled listing of the remote files under one storage path.
//!
//! Each refresh and delete takes a sequence number when it is issued. A
//! response only lands if nothing newer has been applied since, so an old
//! listing that resolves late cannot overwrite a newer one, and `clear()`
//! invalidates everything still in flight.

use crate::error::{ContentDeskError, Result};
use crate::logging::{log_info, log_warn};
use crate::transfer::{join_path, TransferEndpoint};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

const COMPONENT: &str = "file-inventory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "isDirectory", default)]
    pub is_dir: bool,
    #[serde(rename = "modifiedAt", default)]
    pub modified: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            is_dir: false,
            modified: None,
        }
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    path: Option<String>,
    records: IndexMap<String, FileRecord>,
    next_sequence: u64,
    applied_sequence: u64,
    // Requests issued at or below this were started before the last clear
    cleared_at: u64,
    // Set by clear(); a never-scoped inventory leaves this false
    cleared: bool,
    last_error: Option<String>,
}

impl InventoryState {
    fn issue(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}

#[derive(Clone)]
pub struct FileInventory {
    endpoint: Arc<dyn TransferEndpoint>,
    state: Arc<Mutex<InventoryState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl std::fmt::Debug for FileInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileInventory")
            .field("endpoint", &"<transfer endpoint>")
            .field("path", &self.path())
            .field("records", &self.len())
            .finish()
    }
}

impl FileInventory {
    pub fn new(endpoint: Arc<dyn TransferEndpoint>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            endpoint,
            state: Arc::new(Mutex::new(InventoryState::default())),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Replace the listing with a fresh one for `path`.
    ///
    /// Returns `Ok(false)` when the response arrived after a newer refresh,
    /// delete or clear had already been applied and was discarded.
    pub async fn refresh(&self, path: &str) -> Result<bool> {
        let sequence = self.lock().issue();
        self.fetch(path, sequence).await
    }

    /// Refresh `path` if the inventory is showing it. A never-scoped
    /// inventory adopts `path`; a cleared one or one showing another path is
    /// left alone.
    pub async fn refresh_if_showing(&self, path: &str) -> Result<bool> {
        let sequence = {
            let mut state = self.lock();
            let showing = match state.path.as_deref() {
                Some(current) => current == path,
                None => !state.cleared,
            };
            if !showing {
                return Ok(false);
            }
            state.issue()
        };
        self.fetch(path, sequence).await
    }

    async fn fetch(&self, path: &str, sequence: u64) -> Result<bool> {
        let listing = self.endpoint.list(path).await;

        let mut state = self.lock();
        let current = sequence > state.applied_sequence && sequence > state.cleared_at;

        match listing {
            Ok(records) => {
                if !current {
                    tracing::debug!(
                        component = COMPONENT,
                        path = path,
                        sequence = sequence,
                        applied = state.applied_sequence,
                        "discarding stale listing"
                    );
                    return Ok(false);
                }

                state.applied_sequence = sequence;
                state.path = Some(path.to_string());
                state.cleared = false;
                state.records = records
                    .into_iter()
                    .map(|record| (record.name.clone(), record))
                    .collect();
                state.last_error = None;
                drop(state);

                self.notify();
                Ok(true)
            }
            Err(source) => {
                // Previous snapshot stays in place
                if current {
                    state.last_error = Some(source.to_string());
                }
                drop(state);

                log_warn(
                    COMPONENT,
                    &format!("⚠ Listing {} failed: {}", path, source),
                )
                .unwrap_or_default();
                self.notify();

                Err(ContentDeskError::Refresh {
                    path: path.to_string(),
                    source,
                })
            }
        }
    }

    /// Delete `dir/name` remotely, then drop the matching record.
    ///
    /// On failure the listing is left exactly as it was.
    pub async fn delete(&self, dir: &str, name: &str) -> Result<()> {
        let sequence = self.lock().issue();
        let target = join_path(dir, name);

        let response = self
            .endpoint
            .delete(&target)
            .await
            .and_then(|response| response.into_result());

        if let Err(source) = response {
            log_warn(
                COMPONENT,
                &format!("⚠ Delete of {} failed: {}", target, source),
            )
            .unwrap_or_default();
            return Err(ContentDeskError::Delete {
                path: target,
                source,
            });
        }

        let removed = {
            let mut state = self.lock();
            if sequence <= state.cleared_at || state.path.as_deref() != Some(dir) {
                false
            } else {
                state.applied_sequence = state.applied_sequence.max(sequence);
                state.records.shift_remove(name).is_some()
            }
        };

        if removed {
            self.notify();
        }

        log_info(COMPONENT, &format!("🗑 Deleted {}", target)).unwrap_or_default();
        Ok(())
    }

    /// Point the inventory at `path` with an empty listing, discarding
    /// anything in flight for the previous path.
    pub fn scope(&self, path: &str) {
        {
            let mut state = self.lock();
            Self::reset(&mut state);
            state.cleared = false;
            state.path = Some(path.to_string());
        }
        self.notify();
    }

    /// Empty the listing when its owner navigates away
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            Self::reset(&mut state);
            state.cleared = true;
        }
        self.notify();
    }

    fn reset(state: &mut InventoryState) {
        state.records.clear();
        state.path = None;
        state.last_error = None;
        state.cleared_at = state.next_sequence;
        state.applied_sequence = state.next_sequence;
    }

    pub fn path(&self) -> Option<String> {
        self.lock().path.clone()
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.lock().records.values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<FileRecord> {
        self.lock().records.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Version counter bumped on every visible change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

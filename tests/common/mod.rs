// Shared doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use contentdesk::events::{ChangeFeedClient, FeedError, FeedFilter, MemoryFeed, Subscription};
use contentdesk::inventory::FileRecord;
use contentdesk::transfer::{
    join_path, LocalFile, ProgressFn, TransferEndpoint, TransferError, TransferResponse,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Storage backend double: uploads report four progress ticks and then the
/// scripted status for that file name (200 by default).
#[derive(Default)]
pub struct ScriptedEndpoint {
    statuses: Mutex<HashMap<String, u16>>,
    failing_deletes: Mutex<HashSet<String>>,
    stored: Mutex<HashMap<String, Vec<FileRecord>>>,
    pub progress_log: Mutex<HashMap<String, Vec<(u64, u64)>>>,
    pub list_calls: AtomicUsize,
}

impl ScriptedEndpoint {
    pub fn respond_with(&self, file_name: &str, status: u16) {
        self.statuses
            .lock()
            .unwrap()
            .insert(file_name.to_string(), status);
    }

    pub fn fail_delete(&self, path: &str) {
        self.failing_deletes.lock().unwrap().insert(path.to_string());
    }

    pub fn store(&self, dir: &str, record: FileRecord) {
        self.stored
            .lock()
            .unwrap()
            .entry(dir.to_string())
            .or_default()
            .push(record);
    }

    pub fn ticks(&self, file_name: &str) -> Vec<(u64, u64)> {
        self.progress_log
            .lock()
            .unwrap()
            .get(file_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransferEndpoint for ScriptedEndpoint {
    async fn upload(
        &self,
        path: &str,
        file: &LocalFile,
        on_progress: ProgressFn,
    ) -> Result<TransferResponse, TransferError> {
        let total = file.size_bytes;
        for quarter in 1..=4u64 {
            let sent = total * quarter / 4;
            self.progress_log
                .lock()
                .unwrap()
                .entry(file.name.clone())
                .or_default()
                .push((sent, total));
            on_progress(sent, total);
            tokio::task::yield_now().await;
        }

        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(&file.name)
            .copied()
            .unwrap_or(200);

        if (200..300).contains(&status) {
            self.store(path, FileRecord::file(file.name.clone(), total));
            Ok(TransferResponse {
                status,
                body: format!("{{\"name\":\"{}\"}}", file.name),
            })
        } else {
            Ok(TransferResponse {
                status,
                body: "Internal Server Error".to_string(),
            })
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<FileRecord>, TransferError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .stored
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, path: &str) -> Result<TransferResponse, TransferError> {
        if self.failing_deletes.lock().unwrap().contains(path) {
            return Ok(TransferResponse {
                status: 403,
                body: "Forbidden".to_string(),
            });
        }

        let mut stored = self.stored.lock().unwrap();
        for (dir, records) in stored.iter_mut() {
            records.retain(|record| join_path(dir, &record.name) != path);
        }
        Ok(TransferResponse {
            status: 204,
            body: String::new(),
        })
    }
}

/// Change feed whose row reads are held back until the test releases them
pub struct GatedFeed {
    pub inner: MemoryFeed,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail_reads: bool,
}

impl GatedFeed {
    pub fn new(inner: MemoryFeed) -> (Self, oneshot::Sender<()>) {
        let (release, gate) = oneshot::channel();
        let feed = Self {
            inner,
            gate: Mutex::new(Some(gate)),
            fail_reads: false,
        };
        (feed, release)
    }

    /// Every baseline read fails once released
    pub fn failing(inner: MemoryFeed) -> (Self, oneshot::Sender<()>) {
        let (mut feed, release) = Self::new(inner);
        feed.fail_reads = true;
        (feed, release)
    }
}

#[async_trait]
impl ChangeFeedClient for GatedFeed {
    async fn subscribe(
        &self,
        collection: &str,
        filter: FeedFilter,
    ) -> Result<Subscription, FeedError> {
        self.inner.subscribe(collection, filter).await
    }

    async fn read_one(
        &self,
        collection: &str,
        resource_id: &str,
    ) -> Result<Option<Value>, FeedError> {
        // The row is captured now and delivered once the gate opens
        let row = self.inner.read_one(collection, resource_id).await;

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.fail_reads {
            return Err(FeedError::Request("row read timed out".to_string()));
        }
        row
    }
}

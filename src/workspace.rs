//! One project screen: a completion tracker, an upload queue and the remote
//! listing for the path being shown.

use crate::config::ContentDeskConfig;
use crate::error::Result;
use crate::events::ChangeFeedClient;
use crate::inventory::FileInventory;
use crate::logging::log_info;
use crate::tracker::{CompletionRule, CompletionTracker};
use crate::transfer::TransferEndpoint;
use crate::upload_queue::UploadQueue;
use std::sync::Arc;

const COMPONENT: &str = "workspace";

#[derive(Debug)]
pub struct Workspace {
    tracker: CompletionTracker,
    uploads: UploadQueue,
    inventory: FileInventory,
}

impl Workspace {
    pub fn new(
        feed: Arc<dyn ChangeFeedClient>,
        endpoint: Arc<dyn TransferEndpoint>,
        collection: impl Into<String>,
        rule: impl CompletionRule,
        config: &ContentDeskConfig,
    ) -> Self {
        let inventory = FileInventory::new(endpoint.clone());
        let uploads = UploadQueue::from_config(endpoint, inventory.clone(), "", config);
        let tracker =
            CompletionTracker::new(feed, collection, rule).with_settings(config.tracker.clone());

        Self {
            tracker,
            uploads,
            inventory,
        }
    }

    /// Show `path`: new uploads land there and the listing is reloaded.
    /// A failed listing leaves the inventory empty with its error recorded.
    pub async fn open(&self, path: &str) -> Result<()> {
        log_info(COMPONENT, &format!("📂 Opening {}", path)).unwrap_or_default();

        self.inventory.scope(path);
        self.uploads.set_destination(path);
        self.inventory.refresh(path).await.map(|_| ())
    }

    /// Leave the screen: stop watching, abort uploads and empty the listing
    pub fn close(&self) {
        self.tracker.stop_watching();
        self.uploads.cancel_all();
        self.inventory.clear();

        log_info(COMPONENT, "📁 Workspace closed").unwrap_or_default();
    }

    /// False while uploads are still pending or in flight
    pub fn can_close(&self) -> bool {
        !self.uploads.is_busy()
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn uploads(&self) -> &UploadQueue {
        &self.uploads
    }

    pub fn inventory(&self) -> &FileInventory {
        &self.inventory
    }
}

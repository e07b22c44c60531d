// Client-side coordination for content project dashboards: completion
// tracking over a change feed, concurrent uploads with progress, and the
// remote file listing they feed into.

pub mod config;
pub mod error;
pub mod events;
pub mod inventory;
pub mod logging;
pub mod tracker;
pub mod transfer;
pub mod upload_queue;
pub mod workspace;

pub use config::{ContentDeskConfig, EndpointConfig, PreBaselinePolicy, TrackerSettings};
pub use error::{ContentDeskError, Result};
pub use events::{ChangeFeedClient, MemoryFeed};
pub use inventory::{FileInventory, FileRecord};
pub use tracker::{CompletionRule, CompletionTracker, RecordInserted, SubItemGrowth, WatchStatus};
pub use transfer::{HttpTransferEndpoint, LocalFile, TransferEndpoint, TransferError};
pub use upload_queue::{ItemStatus, QueueSummary, UploadItem, UploadQueue};
pub use workspace::Workspace;

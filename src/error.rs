use thiserror::Error;

use crate::events::FeedError;
use crate::transfer::TransferError;

/// ContentDesk client errors
#[derive(Debug, Error)]
pub enum ContentDeskError {
    /// Change feed connection lost or could not be opened
    #[error("Subscription error: {0}")]
    Subscription(#[from] FeedError),

    /// Baseline read for a watch session failed
    #[error("Baseline read error: {0}")]
    BaselineRead(String),

    /// Remote delete failed; inventory left unchanged
    #[error("Delete error for {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: TransferError,
    },

    /// Listing refresh failed; previous snapshot retained
    #[error("Refresh error for {path}: {source}")]
    Refresh {
        path: String,
        #[source]
        source: TransferError,
    },

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ContentDeskError>;

/// UI bindings surface errors as plain strings
impl From<ContentDeskError> for String {
    fn from(err: ContentDeskError) -> String {
        err.to_string()
    }
}

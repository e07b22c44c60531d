//! Transfer endpoint capability: multipart upload with progress, listing, delete.

mod http;

pub use http::HttpTransferEndpoint;

use crate::inventory::FileRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Progress callback: `(bytes_sent, bytes_total)`
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

pub type LocalReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// No response reached us
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status
    #[error("server rejected request with status {status}: {body}")]
    ServerRejected { status: u16, body: String },

    #[error("response could not be decoded: {0}")]
    InvalidResponse(String),

    #[error("could not read local file: {0}")]
    LocalFile(String),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::ServerRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub status: u16,
    pub body: String,
}

impl TransferResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Non-2xx responses become [`TransferError::ServerRejected`]
    pub fn into_result(self) -> Result<Self, TransferError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransferError::ServerRejected {
                status: self.status,
                body: self.body,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

/// A file selected by the user, ready to be streamed.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub size_bytes: u64,
    pub source: FileSource,
}

impl LocalFile {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Arc<[u8]> = Arc::from(bytes.into());
        Self {
            name: name.into(),
            size_bytes: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TransferError::LocalFile(format!("{}: {}", path.display(), e)))?;

        if !metadata.is_file() {
            return Err(TransferError::LocalFile(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TransferError::LocalFile(format!("invalid file name: {}", path.display())))?
            .to_string();

        Ok(Self {
            name,
            size_bytes: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub async fn open(&self) -> Result<LocalReader, TransferError> {
        match &self.source {
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| TransferError::LocalFile(format!("{}: {}", path.display(), e)))?;
                Ok(Box::new(file))
            }
            FileSource::Memory(bytes) => Ok(Box::new(std::io::Cursor::new(Arc::clone(bytes)))),
        }
    }
}

/// Join a storage directory and a file name with exactly one separator.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[async_trait]
pub trait TransferEndpoint: Send + Sync {
    /// Stream `file` into directory `path`, reporting progress as bytes go out.
    async fn upload(
        &self,
        path: &str,
        file: &LocalFile,
        on_progress: ProgressFn,
    ) -> Result<TransferResponse, TransferError>;

    async fn list(&self, path: &str) -> Result<Vec<FileRecord>, TransferError>;

    /// Delete the object at `path` (directory joined with file name)
    async fn delete(&self, path: &str) -> Result<TransferResponse, TransferError>;
}

//! Transfer endpoint over the backend's HTTP storage proxy.

use super::{LocalFile, ProgressFn, TransferEndpoint, TransferError, TransferResponse};
use crate::config::EndpointConfig;
use crate::error::Result;
use crate::inventory::FileRecord;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpTransferEndpoint {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpTransferEndpoint {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn route_url(&self, route: &str, path: &str) -> std::result::Result<Url, TransferError> {
        let mut url = Url::parse(&format!("{}{}", self.config.server_url, route))
            .map_err(|e| TransferError::Network(format!("invalid endpoint URL: {}", e)))?;
        url.query_pairs_mut().append_pair("path", path);
        Ok(url)
    }

    async fn read_response(
        response: reqwest::Response,
    ) -> std::result::Result<TransferResponse, TransferError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Ok(TransferResponse { status, body })
    }
}

fn network_error(e: reqwest::Error) -> TransferError {
    TransferError::Network(format!("HTTP request failed: {}", e))
}

#[async_trait]
impl TransferEndpoint for HttpTransferEndpoint {
    async fn upload(
        &self,
        path: &str,
        file: &LocalFile,
        on_progress: ProgressFn,
    ) -> std::result::Result<TransferResponse, TransferError> {
        let url = self.route_url(&self.config.upload_route, path)?;
        let reader = file.open().await?;
        let total = file.size_bytes;

        // Count bytes as the body stream hands them to the connection
        let mut sent = 0u64;
        let body = ReaderStream::new(reader).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_progress(sent.min(total), total);
            }
            chunk
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(file.name.clone());
        let form = Form::new()
            .text("path", path.to_string())
            .part("file", part);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        Self::read_response(response).await
    }

    async fn list(&self, path: &str) -> std::result::Result<Vec<FileRecord>, TransferError> {
        let url = self.route_url(&self.config.files_route, path)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let rejected = Self::read_response(response).await?;
            return Err(TransferError::ServerRejected {
                status: rejected.status,
                body: rejected.body,
            });
        }

        let bytes = response.bytes().await.map_err(network_error)?;
        serde_json::from_slice(&bytes).map_err(|e| TransferError::InvalidResponse(e.to_string()))
    }

    async fn delete(&self, path: &str) -> std::result::Result<TransferResponse, TransferError> {
        let url = self.route_url(&self.config.files_route, path)?;

        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(network_error)?;

        Self::read_response(response).await
    }
}

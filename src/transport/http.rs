// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! HTTP transport for the analysis service (multipart upload, JSON poll).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use tracing::debug;

use super::{
    AnalysisTransport, PollStatus, ProcessResponse, ServiceHealth, TransportError, UploadReceipt,
    UploadResponse,
};
use crate::config::ServiceConfig;
use crate::document::Document;

/// Multipart field the upload endpoint reads the file from.
const UPLOAD_FIELD: &str = "document";

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    upload_path: String,
    process_path: String,
    health_path: String,
}

impl HttpTransport {
    /// Create a transport for the service described by `config`.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid service URL: {}", config.base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            upload_path: config.upload_path.clone(),
            process_path: config.process_path.clone(),
            health_path: config.health_path.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a service path (or an absolute URL) against the base URL.
    /// Leading slashes are relative to the base, so a base with a path prefix is kept.
    fn endpoint(&self, operation: &'static str, path: &str) -> Result<Url, TransportError> {
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
        } else {
            self.base_url.join(path.trim_start_matches('/'))
        };
        joined.map_err(|e| TransportError::Request {
            operation,
            message: format!("bad endpoint {:?}: {}", path, e),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        url: Url,
    ) -> Result<T, TransportError> {
        debug!(%url, "GET {}", operation);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(operation, e))?;
        if !resp.status().is_success() {
            return Err(TransportError::Status {
                operation,
                status: resp.status().as_u16(),
            });
        }
        resp.json().await.map_err(|e| TransportError::Decode {
            operation,
            message: e.to_string(),
        })
    }
}

fn request_error(operation: &'static str, e: reqwest::Error) -> TransportError {
    if e.is_connect() || e.is_timeout() {
        TransportError::Unavailable(e.to_string())
    } else {
        TransportError::Request {
            operation,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(
        &self,
        document: &Document,
        content: Vec<u8>,
    ) -> Result<UploadReceipt, TransportError> {
        let url = self.endpoint("upload", &self.upload_path)?;
        let part = Part::bytes(content)
            .file_name(document.display_name.clone())
            .mime_str(document.mime_class.mime_type())
            .map_err(|e| request_error("upload", e))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        debug!(%url, document = %document.id, "POST upload");
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error("upload", e))?;
        if !resp.status().is_success() {
            return Err(TransportError::Status {
                operation: "upload",
                status: resp.status().as_u16(),
            });
        }
        let body: UploadResponse = resp.json().await.map_err(|e| TransportError::Decode {
            operation: "upload",
            message: e.to_string(),
        })?;
        Ok(body.into_receipt(&self.process_path))
    }

    async fn poll(&self, receipt: &UploadReceipt) -> Result<PollStatus, TransportError> {
        let url = self.endpoint("process", &receipt.process_endpoint)?;
        let body: ProcessResponse = self.get_json("process", url).await?;
        body.into_poll_status()
    }

    async fn health(&self) -> Result<ServiceHealth, TransportError> {
        let url = self.endpoint("health", &self.health_path)?;
        self.get_json("health", url).await
    }
}

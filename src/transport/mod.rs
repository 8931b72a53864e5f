// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Analysis service transport.
//!
//! The orchestrator only talks to the service through [`AnalysisTransport`]:
//! one upload, then polls until the signals are ready. This module also owns
//! the wire format of the service and its ingestion into validated
//! [`SignalResult`] values; anything malformed is rejected here, before it can
//! reach aggregation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::document::Document;
use crate::signal::{
    rounded_confidence, BoundingBox, Finding, SignalError, SignalKind, SignalResult, SignalStatus,
};

pub mod http;
pub mod offline;

pub use http::HttpTransport;
pub use offline::OfflineTransport;

/// Placeholder in the process path replaced by the service's document id.
pub const DOCUMENT_ID_PLACEHOLDER: &str = "{document_id}";

/// Upload or poll failure. Recovered by the orchestrator's synthetic fallback.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("analysis service unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} returned HTTP {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("{operation} request failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("invalid {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("malformed signal output: {0}")]
    Signal(#[from] SignalError),
}

/// Where to poll for a document accepted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Identifier assigned by the service.
    pub document_id: String,
    /// Service-side path of the normalized image, when reported.
    pub processing_path: Option<String>,
    /// Path or URL of the process endpoint for this document.
    pub process_endpoint: String,
}

/// One poll of the process endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    /// All three signals, one per kind, in the order they were ingested.
    Complete(Vec<SignalResult>),
}

/// Response of the service health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub version: String,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// Client side of the analysis service.
///
/// Implementations must be cheap to share: the orchestrator holds one behind
/// an `Arc` and calls it from spawned tasks.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Submit the document bytes as a multipart upload.
    async fn upload(
        &self,
        document: &Document,
        content: Vec<u8>,
    ) -> Result<UploadReceipt, TransportError>;

    /// Ask the service whether the signals for an uploaded document are ready.
    async fn poll(&self, receipt: &UploadReceipt) -> Result<PollStatus, TransportError>;

    async fn health(&self) -> Result<ServiceHealth, TransportError>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub document_id: String,
    #[serde(default)]
    pub file_info: Option<FileInfo>,
    #[serde(default)]
    pub process_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub processing_path: Option<String>,
}

impl UploadResponse {
    /// Turn the response into a receipt. A missing `process_endpoint` is built
    /// from `process_path`.
    pub fn into_receipt(self, process_path: &str) -> UploadReceipt {
        let process_endpoint = match self.process_endpoint {
            Some(endpoint) if !endpoint.is_empty() => endpoint,
            _ => process_path.replace(DOCUMENT_ID_PLACEHOLDER, &self.document_id),
        };
        UploadReceipt {
            processing_path: self.file_info.and_then(|f| f.processing_path),
            document_id: self.document_id,
            process_endpoint,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub status: Option<String>,
    /// While processing, the service lists signal names here instead of results.
    #[serde(default)]
    pub signals: Option<serde_json::Value>,
    #[serde(default)]
    pub overall_confidence: Option<f64>,
    #[serde(default)]
    pub verdict: Option<String>,
    /// Set when the service's own pipeline failed; the signals are placeholders.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSignal {
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    findings: Vec<WireFinding>,
    #[serde(default)]
    regions: Vec<WireRegion>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFinding {
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    anomaly: Option<String>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    region: Option<Vec<f64>>,
    #[serde(default)]
    regions: Vec<Vec<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireRegion {
    #[serde(default)]
    bbox: Vec<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl ProcessResponse {
    /// Ingest the response. Signals missing from a complete response, or
    /// reported as errored, become [`SignalResult::failed`].
    pub fn into_poll_status(self) -> Result<PollStatus, TransportError> {
        let processing = self
            .status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("processing"))
            .unwrap_or(false);
        if self.error.as_ref().map(is_truthy).unwrap_or(false) {
            return Err(TransportError::Decode {
                operation: "process",
                message: format!(
                    "service reported a processing error: {}",
                    self.error_message.as_deref().unwrap_or("no details")
                ),
            });
        }
        let map = match self.signals {
            Some(serde_json::Value::Object(map)) if !processing => map,
            _ => return Ok(PollStatus::Pending),
        };

        if let (Some(confidence), Some(verdict)) = (self.overall_confidence, &self.verdict) {
            debug!(confidence, verdict = %verdict, "service-side assessment (informational)");
        }

        let mut by_kind: BTreeMap<SignalKind, SignalResult> = BTreeMap::new();
        let mut order = Vec::new();
        for (key, value) in map {
            let Some(kind) = SignalKind::from_key(&key) else {
                debug!(key = %key, "ignoring unknown signal");
                continue;
            };
            if by_kind.contains_key(&kind) {
                continue;
            }
            let wire: WireSignal =
                serde_json::from_value(value).map_err(|e| TransportError::Decode {
                    operation: "process",
                    message: format!("{} signal: {}", kind, e),
                })?;
            by_kind.insert(kind, ingest_signal(kind, wire)?);
            order.push(kind);
        }
        for kind in SignalKind::ALL {
            if !by_kind.contains_key(&kind) {
                warn!(signal = %kind, "signal missing from service response");
                by_kind.insert(kind, SignalResult::failed(kind));
                order.push(kind);
            }
        }

        if by_kind.values().all(|s| s.status() == SignalStatus::Failed) {
            return Err(TransportError::Decode {
                operation: "process",
                message: "every signal failed".to_string(),
            });
        }

        Ok(PollStatus::Complete(
            order
                .into_iter()
                .filter_map(|k| by_kind.remove(&k))
                .collect(),
        ))
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

fn ingest_signal(kind: SignalKind, wire: WireSignal) -> Result<SignalResult, TransportError> {
    let errored = wire.error.is_some()
        || wire
            .status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("failed"))
            .unwrap_or(false);
    if errored {
        warn!(signal = %kind, "service reported signal as failed");
        return Ok(SignalResult::failed(kind));
    }

    let label = kind.to_string();
    let confidence = rounded_confidence(&label, wire.confidence.unwrap_or(0.0))?;

    let mut findings = Vec::with_capacity(wire.findings.len() + wire.regions.len());
    for f in wire.findings {
        let finding_confidence = rounded_confidence("finding", f.confidence.unwrap_or(0.0))?;
        let raw_region = f.bbox.or(f.region).or_else(|| f.regions.into_iter().next());
        let region = raw_region.and_then(|r| ingest_region(kind, &r));
        let description = f
            .description
            .unwrap_or_else(|| format!("{} anomaly", kind.display_name()));
        let finding = Finding::new(region, finding_confidence, description)?;
        findings.push(match f.anomaly {
            Some(anomaly) => finding.with_anomaly(anomaly),
            None => finding,
        });
    }
    if kind == SignalKind::Ela {
        for r in wire.regions {
            let region_confidence = rounded_confidence("region", r.confidence.unwrap_or(0.0))?;
            let region = ingest_region(kind, &r.bbox);
            findings.push(Finding::new(
                region,
                region_confidence,
                format!("Editing artifacts detected (confidence: {}%)", region_confidence),
            )?);
        }
    }

    let summary = wire
        .summary
        .unwrap_or_else(|| "No summary available".to_string());
    Ok(SignalResult::new(kind, confidence, summary, findings)?)
}

/// Parse a `[x, y, width, height]` region. Anything unusable is dropped with a
/// warning; the finding itself is kept.
fn ingest_region(kind: SignalKind, raw: &[f64]) -> Option<BoundingBox> {
    if raw.len() != 4 || raw.iter().any(|v| !v.is_finite()) {
        warn!(signal = %kind, region = ?raw, "dropping malformed region");
        return None;
    }
    let t = [raw[0] as i64, raw[1] as i64, raw[2] as i64, raw[3] as i64];
    match BoundingBox::from_tuple(t) {
        Ok(b) => Some(b),
        Err(e) => {
            warn!(signal = %kind, "dropping region: {}", e);
            None
        }
    }
}

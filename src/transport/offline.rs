// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Transport for running without a service. Every call fails as unavailable,
//! so the orchestrator always takes the synthetic path.

use async_trait::async_trait;

use super::{AnalysisTransport, PollStatus, ServiceHealth, TransportError, UploadReceipt};
use crate::document::Document;

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransport;

const REASON: &str = "offline mode";

#[async_trait]
impl AnalysisTransport for OfflineTransport {
    fn name(&self) -> &str {
        "offline"
    }

    async fn upload(
        &self,
        _document: &Document,
        _content: Vec<u8>,
    ) -> Result<UploadReceipt, TransportError> {
        Err(TransportError::Unavailable(REASON.to_string()))
    }

    async fn poll(&self, _receipt: &UploadReceipt) -> Result<PollStatus, TransportError> {
        Err(TransportError::Unavailable(REASON.to_string()))
    }

    async fn health(&self) -> Result<ServiceHealth, TransportError> {
        Err(TransportError::Unavailable(REASON.to_string()))
    }
}

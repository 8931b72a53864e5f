// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! forgecheck: client for a document-forgery analysis service.
//!
//! A document passes the [`FileValidator`], is analysed by the
//! [`AnalysisOrchestrator`] (upload, then ELA, OCR and metadata signals),
//! and the three [`SignalResult`]s are fused by the [`ResultAggregator`].
//! The result drives a [`HeatmapRegionIndex`] for interactive inspection and
//! can be saved as a JSON report.

pub mod aggregate;
pub mod config;
pub mod document;
pub mod heatmap;
pub mod orchestrator;
pub mod render;
pub mod report;
pub mod session;
pub mod signal;
pub mod transport;

pub use aggregate::{AggregateResult, ResultAggregator, ResultSource, SignalWeights, Verdict};
pub use config::Config;
pub use document::{CandidateFile, Document, FileValidator, MimeClass, ValidationError};
pub use heatmap::{ColorTier, DisplayPoint, DisplayScale, HeatmapRegion, HeatmapRegionIndex};
pub use orchestrator::{
    run_orchestrator, AnalysisOrchestrator, JobHandle, JobStage, JobUpdate, OrchestratorSettings,
};
pub use report::ReportError;
pub use session::SessionState;
pub use signal::{BoundingBox, Finding, SignalKind, SignalResult, SignalStatus};
pub use transport::{AnalysisTransport, HttpTransport, OfflineTransport, TransportError};

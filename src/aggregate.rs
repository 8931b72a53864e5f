// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Result aggregation: fuses the three signal results into one verdict.
//!
//! # Policy
//!
//! - **Overall confidence** is the weighted fusion of the signal confidences,
//!   `round_half_up((wE*ELA + wO*OCR + wM*METADATA) / 100)`, with integer weights
//!   that sum to 100 (default 40/30/30, ELA being the most reliable image signal).
//!   Non-decreasing in every input.
//! - **Uncertainty** measures disagreement between the signals:
//!   `min(100, round_half_up(2 * stddev))` over the three confidences. Identical
//!   signals give 0, the widest possible spread (0, 0, 100) gives 94.
//! - **Verdict** tiers on overall confidence: `< 50` authentic, `50..=79`
//!   suspicious, `>= 80` tampered.
//!
//! Aggregation never fails. Confidence ranges are enforced when signals are
//! ingested (see [`crate::signal`]), and a missing signal counts as failed.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signal::{Finding, SignalKind, SignalResult};

/// Overall confidence at or above which a document is suspicious.
pub const SUSPICIOUS_THRESHOLD: u8 = 50;
/// Overall confidence at or above which a document is considered tampered.
pub const TAMPERED_THRESHOLD: u8 = 80;

/// Maximum number of recommendations attached to a result.
const MAX_RECOMMENDATIONS: usize = 5;

/// Default number of findings returned by [`AggregateResult::combined_findings`].
pub const DEFAULT_COMBINED_FINDINGS: usize = 10;

/// Tiered, human-facing classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Authentic,
    Suspicious,
    Tampered,
}

impl Verdict {
    pub fn from_confidence(confidence: u8) -> Self {
        if confidence >= TAMPERED_THRESHOLD {
            Verdict::Tampered
        } else if confidence >= SUSPICIOUS_THRESHOLD {
            Verdict::Suspicious
        } else {
            Verdict::Authentic
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AUTHENTIC" => Some(Verdict::Authentic),
            "SUSPICIOUS" => Some(Verdict::Suspicious),
            "TAMPERED" => Some(Verdict::Tampered),
            _ => None,
        }
    }

    /// Static advice for this tier.
    fn recommendations(&self) -> &'static [&'static str] {
        match self {
            Verdict::Tampered => &[
                "Verify document with issuing authority",
                "Cross-check dates and amounts with original records",
                "Request certified copy for comparison",
            ],
            Verdict::Suspicious => &[
                "Review highlighted regions carefully",
                "Check for supporting documentation",
                "Consider digital signature verification",
            ],
            Verdict::Authentic => &["Document appears authentic. No immediate action required."],
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Authentic => write!(f, "AUTHENTIC"),
            Verdict::Suspicious => write!(f, "SUSPICIOUS"),
            Verdict::Tampered => write!(f, "TAMPERED"),
        }
    }
}

/// Provenance of an aggregate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultSource {
    /// Produced from the analysis service's signal outputs.
    Live,
    /// Fabricated locally because the service failed or timed out.
    Synthetic,
}

impl ResultSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LIVE" => Some(ResultSource::Live),
            "SYNTHETIC" => Some(ResultSource::Synthetic),
            _ => None,
        }
    }
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSource::Live => write!(f, "LIVE"),
            ResultSource::Synthetic => write!(f, "SYNTHETIC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signal weights must sum to 100, got {0}")]
pub struct WeightsError(pub u32);

/// Integer percentage weight of each signal in the overall confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalWeights {
    ela: u8,
    ocr: u8,
    metadata: u8,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            ela: 40,
            ocr: 30,
            metadata: 30,
        }
    }
}

impl SignalWeights {
    pub fn new(ela: u8, ocr: u8, metadata: u8) -> Result<Self, WeightsError> {
        let total = u32::from(ela) + u32::from(ocr) + u32::from(metadata);
        if total != 100 {
            return Err(WeightsError(total));
        }
        Ok(Self { ela, ocr, metadata })
    }

    pub fn weight(&self, kind: SignalKind) -> u8 {
        match kind {
            SignalKind::Ela => self.ela,
            SignalKind::Ocr => self.ocr,
            SignalKind::Metadata => self.metadata,
        }
    }
}

/// The fused verdict for one document. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    document_id: String,
    overall_confidence: u8,
    uncertainty: u8,
    verdict: Verdict,
    recommendations: Vec<String>,
    signals: BTreeMap<SignalKind, SignalResult>,
    source: ResultSource,
    processing_time_ms: u64,
}

impl AggregateResult {
    /// Reassemble a previously computed result (e.g. from a saved report)
    /// without re-running the fusion policy.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        document_id: String,
        overall_confidence: u8,
        uncertainty: u8,
        verdict: Verdict,
        recommendations: Vec<String>,
        signals: BTreeMap<SignalKind, SignalResult>,
        source: ResultSource,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            document_id,
            overall_confidence,
            uncertainty,
            verdict,
            recommendations,
            signals,
            source,
            processing_time_ms,
        }
    }

    /// Attach the measured wall-clock time. Called by the orchestrator before
    /// the result is published.
    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn overall_confidence(&self) -> u8 {
        self.overall_confidence
    }

    pub fn uncertainty(&self) -> u8 {
        self.uncertainty
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    /// Signal results keyed by kind, iterated in ELA, OCR, METADATA order.
    pub fn signals(&self) -> &BTreeMap<SignalKind, SignalResult> {
        &self.signals
    }

    pub fn signal(&self, kind: SignalKind) -> Option<&SignalResult> {
        self.signals.get(&kind)
    }

    pub fn source(&self) -> ResultSource {
        self.source
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == ResultSource::Synthetic
    }

    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms
    }

    /// Findings across all signals, highest confidence first. Ties keep
    /// aggregation order.
    pub fn combined_findings(&self, limit: usize) -> Vec<(SignalKind, &Finding)> {
        let mut all: Vec<(SignalKind, &Finding)> = self
            .signals
            .values()
            .flat_map(|s| s.findings().iter().map(move |f| (s.kind(), f)))
            .collect();
        all.sort_by(|a, b| b.1.confidence().cmp(&a.1.confidence()));
        all.truncate(limit);
        all
    }
}

/// Derives overall confidence, uncertainty, verdict and recommendations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator {
    weights: SignalWeights,
}

impl ResultAggregator {
    pub fn new(weights: SignalWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> SignalWeights {
        self.weights
    }

    /// Fuse the signal results. Missing kinds are filled in as failed signals.
    pub fn aggregate(
        &self,
        document_id: &str,
        mut signals: BTreeMap<SignalKind, SignalResult>,
        source: ResultSource,
    ) -> AggregateResult {
        for kind in SignalKind::ALL {
            signals
                .entry(kind)
                .or_insert_with(|| SignalResult::failed(kind));
        }

        let overall_confidence = self.overall_confidence(&signals);
        let uncertainty = uncertainty(&signals);
        let verdict = Verdict::from_confidence(overall_confidence);
        let recommendations = recommendations(verdict, &signals);

        AggregateResult {
            document_id: document_id.to_string(),
            overall_confidence,
            uncertainty,
            verdict,
            recommendations,
            signals,
            source,
            processing_time_ms: 0,
        }
    }

    fn overall_confidence(&self, signals: &BTreeMap<SignalKind, SignalResult>) -> u8 {
        let weighted: u32 = signals
            .values()
            .map(|s| u32::from(self.weights.weight(s.kind())) * u32::from(s.confidence()))
            .sum();
        // Weights sum to 100 and confidences are <= 100, so this stays <= 100.
        ((weighted + 50) / 100) as u8
    }
}

fn uncertainty(signals: &BTreeMap<SignalKind, SignalResult>) -> u8 {
    let values: Vec<f64> = signals.values().map(|s| f64::from(s.confidence())).collect();
    if values.is_empty() {
        return 0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let scaled = (2.0 * variance.sqrt() + 0.5).floor();
    scaled.min(100.0) as u8
}

fn recommendations(verdict: Verdict, signals: &BTreeMap<SignalKind, SignalResult>) -> Vec<String> {
    let mut out: Vec<String> = verdict.recommendations().iter().map(|s| s.to_string()).collect();

    if signals
        .get(&SignalKind::Ela)
        .map(|s| s.confidence() > 70)
        .unwrap_or(false)
    {
        out.push("High ELA confidence: Document shows clear editing artifacts".to_string());
    }
    if signals
        .get(&SignalKind::Ocr)
        .map(|s| s.findings().len() > 2)
        .unwrap_or(false)
    {
        out.push("Multiple text inconsistencies: Verify font and formatting".to_string());
    }
    if signals
        .get(&SignalKind::Metadata)
        .map(|s| {
            s.findings()
                .iter()
                .any(|f| f.anomaly().map(|a| a.contains("date")).unwrap_or(false))
        })
        .unwrap_or(false)
    {
        out.push("Date anomalies: Verify creation and modification dates".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    out.retain(|r| seen.insert(r.clone()));
    out.truncate(MAX_RECOMMENDATIONS);
    out
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Forensics report: a portable JSON rendering of an [`AggregateResult`].
//!
//! The layout is fixed (metadata, overall assessment, per-signal analysis in
//! ELA/OCR/METADATA order, detailed findings, recommendations), so two reports
//! of the same result differ only in `generated_at`. [`parse_report`] reads the
//! bytes back and [`Report::into_aggregate`] restores a result from them, which
//! is how saved reports drive the heatmap again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{AggregateResult, ResultSource, Verdict, DEFAULT_COMBINED_FINDINGS};
use crate::signal::{BoundingBox, Finding, SignalError, SignalKind, SignalResult, SignalStatus};

pub const ANALYSIS_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no analysis result to report")]
    MissingResult,

    #[error("report encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed report: {0}")]
    Malformed(String),

    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level report document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub document_forensics_report: ReportBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBody {
    pub metadata: ReportMetadata,
    pub overall_assessment: OverallAssessment,
    pub signal_analysis: BTreeMap<SignalKind, SignalSection>,
    pub detailed_findings: Vec<DetailedFinding>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub document_id: String,
    pub analysis_version: String,
    pub source: ResultSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub confidence: u8,
    pub uncertainty: u8,
    pub verdict: Verdict,
    #[serde(default)]
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSection {
    pub name: String,
    pub confidence: u8,
    pub summary: String,
    pub status: SignalStatus,
    pub findings_count: usize,
    #[serde(default)]
    pub findings: Vec<ReportFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFinding {
    pub confidence: u8,
    pub description: String,
    /// `[x, y, width, height]` in document pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<[u32; 4]>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedFinding {
    pub signal: SignalKind,
    pub confidence: u8,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<[u32; 4]>,
}

impl ReportFinding {
    fn from_finding(f: &Finding) -> Self {
        Self {
            confidence: f.confidence(),
            description: f.description().to_string(),
            region: f.region().map(BoundingBox::as_tuple),
            anomaly: f.anomaly().map(str::to_string),
        }
    }

    fn into_finding(self) -> Result<Finding, SignalError> {
        let region = match self.region {
            Some([x, y, w, h]) => Some(BoundingBox::new(x, y, w, h)?),
            None => None,
        };
        let finding = Finding::new(region, self.confidence, self.description)?;
        Ok(match self.anomaly {
            Some(anomaly) => finding.with_anomaly(anomaly),
            None => finding,
        })
    }
}

impl From<SignalError> for ReportError {
    fn from(e: SignalError) -> Self {
        ReportError::Malformed(e.to_string())
    }
}

impl Report {
    /// Build the report for `result`, stamped with `generated_at`.
    pub fn from_result(result: &AggregateResult, generated_at: DateTime<Utc>) -> Self {
        let signal_analysis = result
            .signals()
            .values()
            .map(|s| {
                let section = SignalSection {
                    name: s.kind().display_name().to_string(),
                    confidence: s.confidence(),
                    summary: s.summary().to_string(),
                    status: s.status(),
                    findings_count: s.findings().len(),
                    findings: s.findings().iter().map(ReportFinding::from_finding).collect(),
                };
                (s.kind(), section)
            })
            .collect();

        let detailed_findings = result
            .combined_findings(DEFAULT_COMBINED_FINDINGS)
            .into_iter()
            .map(|(signal, f)| DetailedFinding {
                signal,
                confidence: f.confidence(),
                description: f.description().to_string(),
                region: f.region().map(BoundingBox::as_tuple),
            })
            .collect();

        Self {
            document_forensics_report: ReportBody {
                metadata: ReportMetadata {
                    generated_at,
                    document_id: result.document_id().to_string(),
                    analysis_version: ANALYSIS_VERSION.to_string(),
                    source: result.source(),
                },
                overall_assessment: OverallAssessment {
                    confidence: result.overall_confidence(),
                    uncertainty: result.uncertainty(),
                    verdict: result.verdict(),
                    processing_time_ms: result.processing_time_ms(),
                },
                signal_analysis,
                detailed_findings,
                recommendations: result.recommendations().to_vec(),
            },
        }
    }

    /// Restore the aggregate result this report was rendered from. Every
    /// signal and finding is validated again.
    pub fn into_aggregate(self) -> Result<AggregateResult, ReportError> {
        let body = self.document_forensics_report;
        let mut signals = BTreeMap::new();
        for (kind, section) in body.signal_analysis {
            let signal = match section.status {
                SignalStatus::Failed => SignalResult::failed(kind),
                SignalStatus::Completed => {
                    let findings = section
                        .findings
                        .into_iter()
                        .map(ReportFinding::into_finding)
                        .collect::<Result<Vec<_>, _>>()?;
                    SignalResult::new(kind, section.confidence, section.summary, findings)?
                }
            };
            signals.insert(kind, signal);
        }
        for kind in SignalKind::ALL {
            signals.entry(kind).or_insert_with(|| SignalResult::failed(kind));
        }

        let assessment = body.overall_assessment;
        crate::signal::checked_confidence("overall", assessment.confidence.into())?;
        crate::signal::checked_confidence("uncertainty", assessment.uncertainty.into())?;
        let expected = Verdict::from_confidence(assessment.confidence);
        if assessment.verdict != expected {
            return Err(ReportError::Malformed(format!(
                "verdict {} does not match confidence {} (expected {})",
                assessment.verdict, assessment.confidence, expected
            )));
        }

        Ok(AggregateResult::restore(
            body.metadata.document_id,
            assessment.confidence,
            assessment.uncertainty,
            assessment.verdict,
            body.recommendations,
            signals,
            body.metadata.source,
            assessment.processing_time_ms,
        ))
    }

    pub fn document_id(&self) -> &str {
        &self.document_forensics_report.metadata.document_id
    }
}

/// Serialize the result as a pretty-printed JSON report stamped with the current time.
///
/// Fails fast with [`ReportError::MissingResult`] when there is no result,
/// rather than emitting a partial report.
pub fn serialize(result: Option<&AggregateResult>) -> Result<Vec<u8>, ReportError> {
    serialize_at(result, Utc::now())
}

/// Like [`serialize`] with an explicit timestamp.
pub fn serialize_at(
    result: Option<&AggregateResult>,
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>, ReportError> {
    let result = result.ok_or(ReportError::MissingResult)?;
    let report = Report::from_result(result, generated_at);
    let mut bytes = serde_json::to_vec_pretty(&report).map_err(ReportError::Encode)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse report bytes produced by [`serialize`].
pub fn parse_report(bytes: &[u8]) -> Result<Report, ReportError> {
    serde_json::from_slice(bytes).map_err(|e| ReportError::Malformed(e.to_string()))
}

/// Deterministic file name for a document's report: `report_<id>.json`.
pub fn report_file_name(document_id: &str) -> String {
    let safe: String = document_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("report_{}.json", safe)
}

/// Serialize and write the report into `dir`. Returns the written path.
pub fn write_report(dir: &Path, result: Option<&AggregateResult>) -> Result<PathBuf, ReportError> {
    let result = result.ok_or(ReportError::MissingResult)?;
    let bytes = serialize(Some(result))?;
    let path = dir.join(report_file_name(result.document_id()));
    std::fs::write(&path, bytes).map_err(|source| ReportError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::aggregate::ResultAggregator;

    /// Helper: the reference result (ELA 85 with one region, OCR 75, METADATA 95).
    fn reference_result() -> AggregateResult {
        let region = BoundingBox::new(100, 150, 200, 80).unwrap();
        let signals = BTreeMap::from([
            (
                SignalKind::Ela,
                SignalResult::new(
                    SignalKind::Ela,
                    85,
                    "Edited region",
                    vec![Finding::new(Some(region), 90, "Editing artifacts detected").unwrap()],
                )
                .unwrap(),
            ),
            (
                SignalKind::Ocr,
                SignalResult::new(SignalKind::Ocr, 75, "Font mismatch", vec![]).unwrap(),
            ),
            (
                SignalKind::Metadata,
                SignalResult::new(
                    SignalKind::Metadata,
                    95,
                    "Editor software tag",
                    vec![Finding::new(None, 80, "Modified with image editor")
                        .unwrap()
                        .with_anomaly("editing_software")],
                )
                .unwrap(),
            ),
        ]);
        ResultAggregator::default().aggregate("a1b2c3d4", signals, ResultSource::Live)
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_result_fails_fast() {
        assert!(matches!(serialize(None), Err(ReportError::MissingResult)));
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(write_report(dir.path(), None), Err(ReportError::MissingResult)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_round_trip_recovers_assessment() {
        let result = reference_result();
        let bytes = serialize(Some(&result)).unwrap();
        let report = parse_report(&bytes).unwrap();
        let assessment = &report.document_forensics_report.overall_assessment;
        assert_eq!(assessment.confidence, result.overall_confidence());
        assert_eq!(assessment.uncertainty, result.uncertainty());
        assert_eq!(assessment.verdict, result.verdict());

        let restored = report.into_aggregate().unwrap();
        assert_eq!(restored, result);
    }

    #[test]
    fn test_report_contains_required_fields() {
        let bytes = serialize_at(Some(&reference_result()), fixed_time()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let root = &value["document_forensics_report"];

        assert_eq!(root["metadata"]["document_id"], "a1b2c3d4");
        assert_eq!(root["metadata"]["generated_at"], "2026-03-01T12:00:00Z");
        assert_eq!(root["metadata"]["source"], "LIVE");
        assert_eq!(root["overall_assessment"]["confidence"], 85);
        assert_eq!(root["overall_assessment"]["verdict"], "TAMPERED");
        assert_eq!(root["signal_analysis"]["ELA"]["confidence"], 85);
        assert_eq!(root["signal_analysis"]["OCR"]["summary"], "Font mismatch");
        assert_eq!(root["signal_analysis"]["METADATA"]["findings_count"], 1);
        assert_eq!(root["signal_analysis"]["METADATA"]["findings"][0]["type"], "editing_software");
        assert_eq!(
            root["signal_analysis"]["ELA"]["findings"][0]["region"],
            serde_json::json!([100, 150, 200, 80])
        );
        assert!(root["recommendations"].as_array().unwrap().len() >= 3);
        assert_eq!(root["detailed_findings"][0]["signal"], "ELA");
    }

    #[test]
    fn test_signal_order_is_stable() {
        let bytes = serialize_at(Some(&reference_result()), fixed_time()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let ela = text.find("\"ELA\"").unwrap();
        let ocr = text.find("\"OCR\"").unwrap();
        let meta = text.find("\"METADATA\"").unwrap();
        assert!(ela < ocr && ocr < meta);

        // Same result and timestamp serialize identically.
        let again = serialize_at(Some(&reference_result()), fixed_time()).unwrap();
        assert_eq!(text.as_bytes(), again.as_slice());
    }

    #[test]
    fn test_synthetic_source_survives_round_trip() {
        let result = ResultAggregator::default().aggregate(
            "doc",
            BTreeMap::new(),
            ResultSource::Synthetic,
        );
        let restored = parse_report(&serialize(Some(&result)).unwrap())
            .unwrap()
            .into_aggregate()
            .unwrap();
        assert!(restored.is_synthetic());
    }

    #[test]
    fn test_tampered_report_rejected_on_restore() {
        let bytes = serialize(Some(&reference_result())).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["document_forensics_report"]["signal_analysis"]["ELA"]["confidence"] =
            serde_json::json!(120);
        let report: Report = serde_json::from_value(value).unwrap();
        assert!(matches!(report.into_aggregate(), Err(ReportError::Malformed(_))));
    }

    #[test]
    fn test_verdict_inconsistent_with_confidence_rejected() {
        let bytes = serialize(Some(&reference_result())).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["document_forensics_report"]["overall_assessment"]["confidence"] =
            serde_json::json!(10);
        let report: Report = serde_json::from_value(value).unwrap();
        let err = report.into_aggregate().unwrap_err();
        assert!(matches!(&err, ReportError::Malformed(m) if m.contains("TAMPERED")), "{}", err);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(parse_report(b"not json"), Err(ReportError::Malformed(_))));
        assert!(matches!(parse_report(b"{}"), Err(ReportError::Malformed(_))));
    }

    #[test]
    fn test_report_file_name_is_deterministic_and_safe() {
        assert_eq!(report_file_name("a1b2c3d4"), "report_a1b2c3d4.json");
        assert_eq!(report_file_name("../etc/x"), "report____etc_x.json");
    }

    #[test]
    fn test_write_report_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = reference_result();
        let path = write_report(dir.path(), Some(&result)).unwrap();
        assert_eq!(path, dir.path().join("report_a1b2c3d4.json"));
        let report = parse_report(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(report.document_id(), "a1b2c3d4");
    }
}

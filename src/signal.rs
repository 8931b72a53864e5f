// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Normalized output of the three forensic analyzers.
//!
//! Every value here is validated when it is constructed, so downstream code
//! (aggregation, heatmap indexing, reporting) can rely on confidences being in
//! `0..=100` and bounding boxes having a positive area.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound of every confidence score.
pub const MAX_CONFIDENCE: u8 = 100;

/// Summary given to a signal the service failed to produce.
pub const FAILED_SIGNAL_SUMMARY: &str = "Analysis failed or not available";

/// The three independent forensic signals, in aggregation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Ela,
    Ocr,
    Metadata,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [SignalKind::Ela, SignalKind::Ocr, SignalKind::Metadata];

    /// Human-facing analyzer name.
    pub fn display_name(&self) -> &'static str {
        match self {
            SignalKind::Ela => "Error Level Analysis",
            SignalKind::Ocr => "Text Inconsistency",
            SignalKind::Metadata => "Metadata Forensics",
        }
    }

    /// Key used by the analysis service (`ela`, `ocr`, `metadata`).
    pub fn wire_key(&self) -> &'static str {
        match self {
            SignalKind::Ela => "ela",
            SignalKind::Ocr => "ocr",
            SignalKind::Metadata => "metadata",
        }
    }

    /// Parse a service or report key, case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "ela" => Some(SignalKind::Ela),
            "ocr" => Some(SignalKind::Ocr),
            "metadata" => Some(SignalKind::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Ela => write!(f, "ELA"),
            SignalKind::Ocr => write!(f, "OCR"),
            SignalKind::Metadata => write!(f, "METADATA"),
        }
    }
}

/// Whether the analyzer produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Completed,
    Failed,
}

/// Malformed analyzer output, rejected at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("{what} confidence {value} is outside 0..=100")]
    ConfidenceOutOfRange { what: String, value: i64 },

    #[error("bounding box {width}x{height} at ({x}, {y}) is empty or negative")]
    DegenerateRegion { x: i64, y: i64, width: i64, height: i64 },
}

/// Check a raw confidence and narrow it to `u8`.
pub fn checked_confidence(what: &str, value: i64) -> Result<u8, SignalError> {
    if (0..=i64::from(MAX_CONFIDENCE)).contains(&value) {
        Ok(value as u8)
    } else {
        Err(SignalError::ConfidenceOutOfRange {
            what: what.to_string(),
            value,
        })
    }
}

/// Round a fractional score half-up and validate it.
pub fn rounded_confidence(what: &str, value: f64) -> Result<u8, SignalError> {
    if !value.is_finite() {
        return Err(SignalError::ConfidenceOutOfRange {
            what: what.to_string(),
            value: -1,
        });
    }
    checked_confidence(what, (value + 0.5).floor() as i64)
}

/// Axis-aligned box in document-pixel coordinates. Width and height are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self, SignalError> {
        if width == 0 || height == 0 {
            return Err(SignalError::DegenerateRegion {
                x: x.into(),
                y: y.into(),
                width: width.into(),
                height: height.into(),
            });
        }
        Ok(Self { x, y, width, height })
    }

    /// Build from the service's `[x, y, width, height]` tuple.
    pub fn from_tuple(t: [i64; 4]) -> Result<Self, SignalError> {
        let [x, y, width, height] = t;
        let degenerate = || SignalError::DegenerateRegion { x, y, width, height };
        let narrow = |v: i64| u32::try_from(v).map_err(|_| degenerate());
        Self::new(narrow(x)?, narrow(y)?, narrow(width)?, narrow(height)?)
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_tuple(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// Half-open containment: left and top edges are inside, right and bottom are not.
    pub fn contains(&self, px: f64, py: f64) -> bool {
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        px >= x && py >= y && px < x + f64::from(self.width) && py < y + f64::from(self.height)
    }
}

/// One piece of evidence from a signal, optionally localized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    region: Option<BoundingBox>,
    confidence: u8,
    description: String,
    /// Analyzer-specific anomaly type, e.g. `date_anomaly`.
    #[serde(skip_serializing_if = "Option::is_none")]
    anomaly: Option<String>,
}

impl Finding {
    pub fn new(
        region: Option<BoundingBox>,
        confidence: u8,
        description: impl Into<String>,
    ) -> Result<Self, SignalError> {
        let confidence = checked_confidence("finding", confidence.into())?;
        Ok(Self {
            region,
            confidence,
            description: description.into(),
            anomaly: None,
        })
    }

    pub fn with_anomaly(mut self, anomaly: impl Into<String>) -> Self {
        self.anomaly = Some(anomaly.into());
        self
    }

    pub fn region(&self) -> Option<&BoundingBox> {
        self.region.as_ref()
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn anomaly(&self) -> Option<&str> {
        self.anomaly.as_deref()
    }
}

/// The normalized result of one analyzer for one job. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalResult {
    kind: SignalKind,
    status: SignalStatus,
    confidence: u8,
    summary: String,
    findings: Vec<Finding>,
}

impl SignalResult {
    pub fn new(
        kind: SignalKind,
        confidence: u8,
        summary: impl Into<String>,
        findings: Vec<Finding>,
    ) -> Result<Self, SignalError> {
        let confidence = checked_confidence(&kind.to_string(), confidence.into())?;
        Ok(Self {
            kind,
            status: SignalStatus::Completed,
            confidence,
            summary: summary.into(),
            findings,
        })
    }

    /// Placeholder for an analyzer that errored or was missing from the response.
    pub fn failed(kind: SignalKind) -> Self {
        Self {
            kind,
            status: SignalStatus::Failed,
            confidence: 0,
            summary: FAILED_SIGNAL_SUMMARY.to_string(),
            findings: Vec::new(),
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn status(&self) -> SignalStatus {
        self.status
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(checked_confidence("x", 0), Ok(0));
        assert_eq!(checked_confidence("x", 100), Ok(100));
        assert!(checked_confidence("x", 101).is_err());
        assert!(checked_confidence("x", -1).is_err());
    }

    #[test]
    fn test_rounded_confidence_half_up() {
        assert_eq!(rounded_confidence("x", 84.5), Ok(85));
        assert_eq!(rounded_confidence("x", 84.49), Ok(84));
        assert_eq!(rounded_confidence("x", 99.6), Ok(100));
        assert!(rounded_confidence("x", 100.5).is_err());
        assert!(rounded_confidence("x", f64::NAN).is_err());
    }

    #[test]
    fn test_signal_result_rejects_out_of_range() {
        let err = SignalResult::new(SignalKind::Ocr, 150, "bad", vec![]).unwrap_err();
        assert_eq!(
            err,
            SignalError::ConfidenceOutOfRange {
                what: "OCR".to_string(),
                value: 150
            }
        );
        assert!(Finding::new(None, 101, "bad").is_err());
    }

    #[test]
    fn test_bounding_box_requires_positive_area() {
        assert!(BoundingBox::new(0, 0, 0, 10).is_err());
        assert!(BoundingBox::new(0, 0, 10, 0).is_err());
        assert!(BoundingBox::from_tuple([-5, 0, 10, 10]).is_err());
        assert!(BoundingBox::from_tuple([0, 0, -10, 10]).is_err());
        let b = BoundingBox::from_tuple([100, 150, 200, 80]).unwrap();
        assert_eq!(b.as_tuple(), [100, 150, 200, 80]);
    }

    #[test]
    fn test_bounding_box_containment_is_half_open() {
        let b = BoundingBox::new(100, 150, 200, 80).unwrap();
        assert!(b.contains(150.0, 180.0));
        assert!(b.contains(100.0, 150.0));
        assert!(!b.contains(300.0, 180.0));
        assert!(!b.contains(150.0, 230.0));
        assert!(!b.contains(99.9, 180.0));
    }

    #[test]
    fn test_failed_signal_placeholder() {
        let s = SignalResult::failed(SignalKind::Metadata);
        assert_eq!(s.status(), SignalStatus::Failed);
        assert_eq!(s.confidence(), 0);
        assert_eq!(s.summary(), FAILED_SIGNAL_SUMMARY);
        assert!(s.findings().is_empty());
    }

    #[test]
    fn test_kind_keys_and_order() {
        for kind in SignalKind::ALL {
            assert_eq!(SignalKind::from_key(kind.wire_key()), Some(kind));
            assert_eq!(SignalKind::from_key(&kind.to_string()), Some(kind));
        }
        assert!(SignalKind::Ela < SignalKind::Ocr && SignalKind::Ocr < SignalKind::Metadata);
        assert_eq!(SignalKind::from_key("exif"), None);
    }
}

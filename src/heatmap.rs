// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Heatmap region index: tamper evidence laid out in document-pixel space.
//!
//! [`HeatmapRegionIndex::rebuild`] flattens every localized finding of an
//! [`AggregateResult`] into a [`HeatmapRegion`]. Signals are walked in
//! aggregation order (ELA, OCR, METADATA) and findings in the order the
//! analyzer reported them; that insertion order is the hit-test tie-break.
//!
//! Overlapping evidence is common (an edited amount is typically flagged by
//! both ELA and OCR). When a point falls inside several regions, the region
//! inserted first wins, so ELA evidence is preferred over OCR, and OCR over
//! metadata.

use std::fmt;

use serde::Serialize;

use crate::aggregate::AggregateResult;
use crate::signal::{BoundingBox, SignalKind};

/// Display tier derived from a finding's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTier {
    Low,
    Medium,
    High,
}

impl ColorTier {
    /// `>= 80` high, `60..=79` medium, below 60 low.
    pub fn from_confidence(confidence: u8) -> Self {
        if confidence >= 80 {
            ColorTier::High
        } else if confidence >= 60 {
            ColorTier::Medium
        } else {
            ColorTier::Low
        }
    }

    /// Overlay color for this tier.
    pub fn hex(&self) -> &'static str {
        match self {
            ColorTier::High => "#dc3545",
            ColorTier::Medium => "#fd7e14",
            ColorTier::Low => "#ffc107",
        }
    }
}

impl fmt::Display for ColorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorTier::High => write!(f, "high"),
            ColorTier::Medium => write!(f, "medium"),
            ColorTier::Low => write!(f, "low"),
        }
    }
}

/// A clickable overlay element derived from a localized finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapRegion {
    pub signal: SignalKind,
    pub bbox: BoundingBox,
    pub confidence: u8,
    pub description: String,
    pub color_tier: ColorTier,
}

/// A pointer position in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPoint {
    pub x: f64,
    pub y: f64,
}

impl DisplayPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Multipliers converting display coordinates to document pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayScale {
    pub x: f64,
    pub y: f64,
}

impl Default for DisplayScale {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl DisplayScale {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn uniform(factor: f64) -> Self {
        Self { x: factor, y: factor }
    }

    /// Scale for a document of `doc_*` pixels rendered into a `display_*` viewport.
    /// Returns `None` for empty display dimensions.
    pub fn from_sizes(display_w: f64, display_h: f64, doc_w: f64, doc_h: f64) -> Option<Self> {
        if display_w <= 0.0 || display_h <= 0.0 {
            return None;
        }
        Some(Self {
            x: doc_w / display_w,
            y: doc_h / display_h,
        })
    }

    fn is_usable(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }

    fn to_document(&self, point: DisplayPoint) -> (f64, f64) {
        (point.x * self.x, point.y * self.y)
    }
}

/// Current set of heatmap regions, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct HeatmapRegionIndex {
    regions: Vec<HeatmapRegion>,
}

impl HeatmapRegionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index directly from a result.
    pub fn from_result(result: &AggregateResult) -> Self {
        let mut index = Self::new();
        index.rebuild(result);
        index
    }

    /// Replace the regions with those of `result`. Findings without a region are skipped.
    pub fn rebuild(&mut self, result: &AggregateResult) {
        self.regions.clear();
        for signal in result.signals().values() {
            for finding in signal.findings() {
                if let Some(bbox) = finding.region() {
                    self.regions.push(HeatmapRegion {
                        signal: signal.kind(),
                        bbox: *bbox,
                        confidence: finding.confidence(),
                        description: finding.description().to_string(),
                        color_tier: ColorTier::from_confidence(finding.confidence()),
                    });
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Return the first inserted region containing the point, after mapping it
    /// into document space. Unusable scales and non-finite points hit nothing.
    pub fn hit_test(&self, point: DisplayPoint, scale: DisplayScale) -> Option<&HeatmapRegion> {
        if !scale.is_usable() || !point.x.is_finite() || !point.y.is_finite() {
            return None;
        }
        let (dx, dy) = scale.to_document(point);
        self.regions.iter().find(|r| r.bbox.contains(dx, dy))
    }

    /// All regions containing the point, in insertion order.
    pub fn hits(&self, point: DisplayPoint, scale: DisplayScale) -> Vec<&HeatmapRegion> {
        if !scale.is_usable() || !point.x.is_finite() || !point.y.is_finite() {
            return Vec::new();
        }
        let (dx, dy) = scale.to_document(point);
        self.regions.iter().filter(|r| r.bbox.contains(dx, dy)).collect()
    }

    pub fn regions(&self) -> &[HeatmapRegion] {
        &self.regions
    }

    pub fn regions_for(&self, signal: SignalKind) -> impl Iterator<Item = &HeatmapRegion> {
        self.regions.iter().filter(move |r| r.signal == signal)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

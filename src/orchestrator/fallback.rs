// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Synthetic results for when the analysis service cannot be used.
//!
//! Values are derived from the SHA-256 of the document id, so the same
//! document always gets the same substitute. The result goes through the
//! normal [`ResultAggregator`] and is tagged [`ResultSource::Synthetic`].

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::aggregate::{AggregateResult, ResultAggregator, ResultSource};
use crate::signal::{BoundingBox, Finding, SignalKind, SignalResult};

/// Synthetic signal results for `document_id`.
pub fn synthetic_signals(document_id: &str) -> BTreeMap<SignalKind, SignalResult> {
    let d = Sha256::digest(document_id.as_bytes());
    debug!(document = %document_id, seed = %hex::encode(&d[..8]), "synthesizing signals");
    let word = |i: usize| u32::from(u16::from_be_bytes([d[i], d[i + 1]]));

    let ela_conf = 40 + d[0] % 56;
    let ocr_conf = 30 + d[1] % 61;
    let meta_conf = 20 + d[2] % 76;

    // Width and height are never zero.
    let ela_region = BoundingBox::new(
        word(3) % 800,
        word(5) % 1000,
        50 + word(7) % 250,
        20 + word(9) % 100,
    )
    .ok();
    let ocr_region = BoundingBox::new(
        word(11) % 800,
        word(13) % 1000,
        40 + word(15) % 200,
        15 + word(17) % 40,
    )
    .ok();

    let mut signals = BTreeMap::new();
    let mut insert = |kind: SignalKind, confidence: u8, summary: &str, findings: Vec<Option<Finding>>| {
        let findings = findings.into_iter().flatten().collect();
        let signal = SignalResult::new(kind, confidence, summary, findings)
            .unwrap_or_else(|_| SignalResult::failed(kind));
        signals.insert(kind, signal);
    };

    insert(
        SignalKind::Ela,
        ela_conf,
        "Synthetic: compression level variation in one region",
        vec![Finding::new(
            ela_region,
            ela_conf,
            format!("Editing artifacts detected (confidence: {}%)", ela_conf),
        )
        .ok()],
    );
    insert(
        SignalKind::Ocr,
        ocr_conf,
        "Synthetic: minor font inconsistency",
        vec![Finding::new(ocr_region, ocr_conf, "Font size differs from surrounding text").ok()],
    );
    insert(
        SignalKind::Metadata,
        meta_conf,
        "Synthetic: metadata timestamps inconsistent",
        vec![Finding::new(None, meta_conf, "Modification date precedes creation date")
            .map(|f| f.with_anomaly("date_anomaly"))
            .ok()],
    );
    signals
}

/// Build the tagged synthetic result for `document_id`.
pub fn synthetic_result(aggregator: &ResultAggregator, document_id: &str) -> AggregateResult {
    aggregator.aggregate(document_id, synthetic_signals(document_id), ResultSource::Synthetic)
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Text and JSON rendering of session state for the command line.
//!
//! Everything here reads; nothing mutates the values it is given.

use std::fmt::Write as _;

use serde::Serialize;

use crate::aggregate::AggregateResult;
use crate::document::Document;
use crate::heatmap::{DisplayPoint, HeatmapRegion, HeatmapRegionIndex};
use crate::session::{JobSnapshot, SessionState};
use crate::signal::SignalStatus;
use crate::transport::ServiceHealth;

const BAR_WIDTH: usize = 20;

/// Envelope for `--json` output.
#[derive(Debug, Serialize)]
pub struct JsonOut<T: Serialize> {
    pub ok: bool,
    pub data: T,
}

/// Print `data` as a JSON envelope, or as the text produced by `row`.
pub fn print_one<T: Serialize>(json: bool, data: T, row: impl Fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&JsonOut { ok: true, data })?);
    } else {
        println!("{}", row(&data));
    }
    Ok(())
}

fn bar(progress: u8) -> String {
    let filled = usize::from(progress.min(100)) * BAR_WIDTH / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

pub fn progress_line(job: &JobSnapshot) -> String {
    format!(
        "{} {:>3}% {:<16} document {}",
        bar(job.progress),
        job.progress,
        job.stage.to_string(),
        job.document_id
    )
}

pub fn document_line(document: &Document) -> String {
    format!(
        "{} accepted: {} ({} bytes), id {}",
        document.display_name, document.mime_class, document.size_bytes, document.id
    )
}

pub fn health_line(health: &ServiceHealth) -> String {
    let name = if health.service.is_empty() { "analysis service" } else { &health.service };
    if health.version.is_empty() {
        format!("{}: {}", name, health.status)
    } else {
        format!("{} {}: {}", name, health.version, health.status)
    }
}

/// Verdict, scores and per-signal breakdown of a result.
pub fn result_summary(result: &AggregateResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Document {}", result.document_id());
    let _ = writeln!(
        out,
        "Verdict: {}  confidence {}%  uncertainty {}%  ({} ms)",
        result.verdict(),
        result.overall_confidence(),
        result.uncertainty(),
        result.processing_time_ms()
    );
    if result.is_synthetic() {
        let _ = writeln!(
            out,
            "Source: SYNTHETIC (analysis service unavailable, values are a local substitute)"
        );
    }
    let _ = writeln!(out, "Signals:");
    for signal in result.signals().values() {
        let status = match signal.status() {
            SignalStatus::Completed => "",
            SignalStatus::Failed => " [failed]",
        };
        let _ = writeln!(
            out,
            "  {:<9} {:>3}%  {}{}",
            signal.kind().to_string(),
            signal.confidence(),
            signal.summary(),
            status
        );
    }
    if !result.recommendations().is_empty() {
        let _ = writeln!(out, "Recommendations:");
        for r in result.recommendations() {
            let _ = writeln!(out, "  - {}", r);
        }
    }
    out.trim_end().to_string()
}

/// One row per heatmap region, in hit-test priority order.
pub fn region_table(index: &HeatmapRegionIndex) -> String {
    if index.is_empty() {
        return "No localized findings.".to_string();
    }
    let mut out = String::from("  #  signal    x      y      w      h     conf  tier    description\n");
    for (i, r) in index.regions().iter().enumerate() {
        let [x, y, w, h] = r.bbox.as_tuple();
        let _ = writeln!(
            out,
            "{:>3}  {:<8} {:>6} {:>6} {:>6} {:>6}  {:>3}%  {:<6}  {}",
            i + 1,
            r.signal.to_string(),
            x,
            y,
            w,
            h,
            r.confidence,
            r.color_tier.to_string(),
            r.description
        );
    }
    out.trim_end().to_string()
}

pub fn hit_line(point: DisplayPoint, hit: Option<&HeatmapRegion>) -> String {
    match hit {
        Some(r) => format!(
            "({}, {}) -> {} region {:?}: {} ({}%, {})",
            point.x,
            point.y,
            r.signal,
            r.bbox.as_tuple(),
            r.description,
            r.confidence,
            r.color_tier
        ),
        None => format!("({}, {}) -> no region", point.x, point.y),
    }
}

/// Full view of the session: current job line, result and regions.
pub fn session_view(session: &SessionState) -> String {
    let mut parts = Vec::new();
    if let Some(job) = session.current_job() {
        parts.push(progress_line(job));
    }
    match session.current_result() {
        Some(result) => {
            parts.push(result_summary(result));
            parts.push(region_table(session.regions()));
        }
        None => parts.push("No result.".to_string()),
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::aggregate::{ResultAggregator, ResultSource};
    use crate::heatmap::DisplayScale;
    use crate::orchestrator::JobStage;
    use crate::signal::{BoundingBox, Finding, SignalKind, SignalResult};

    fn result(source: ResultSource) -> AggregateResult {
        let ela = SignalResult::new(
            SignalKind::Ela,
            85,
            "Edited region",
            vec![Finding::new(Some(BoundingBox::new(100, 150, 200, 80).unwrap()), 90, "amount edited")
                .unwrap()],
        )
        .unwrap();
        ResultAggregator::default().aggregate("a1b2c3d4", BTreeMap::from([(SignalKind::Ela, ela)]), source)
    }

    #[test]
    fn test_progress_line() {
        let job = JobSnapshot {
            job_id: "j".to_string(),
            document_id: "a1b2c3d4".to_string(),
            stage: JobStage::RunningOcr,
            progress: 66,
        };
        let line = progress_line(&job);
        assert!(line.starts_with("[#############.......]"));
        assert!(line.contains(" 66% RUNNING_OCR"));
        assert!(line.ends_with("a1b2c3d4"));
    }

    #[test]
    fn test_summary_flags_synthetic_and_failed_signals() {
        let text = result_summary(&result(ResultSource::Synthetic));
        assert!(text.contains("Source: SYNTHETIC"));
        assert!(text.contains("OCR"));
        assert!(text.contains("[failed]"));

        let live = result_summary(&result(ResultSource::Live));
        assert!(!live.contains("SYNTHETIC"));
    }

    #[test]
    fn test_region_table_and_hit_line() {
        let index = HeatmapRegionIndex::from_result(&result(ResultSource::Live));
        let table = region_table(&index);
        assert!(table.contains("amount edited"));
        assert!(table.contains("high"));
        assert_eq!(region_table(&HeatmapRegionIndex::new()), "No localized findings.");

        let point = DisplayPoint::new(150.0, 180.0);
        let hit = index.hit_test(point, DisplayScale::default());
        assert!(hit_line(point, hit).contains("ELA region [100, 150, 200, 80]"));
        assert!(hit_line(DisplayPoint::new(500.0, 500.0), None).ends_with("no region"));
    }

    #[test]
    fn test_session_view_without_result() {
        assert_eq!(session_view(&SessionState::new()), "No result.");
    }

    #[test]
    fn test_json_envelope_shape() {
        let value = serde_json::to_value(JsonOut { ok: true, data: 5 }).unwrap();
        assert_eq!(value, serde_json::json!({"ok": true, "data": 5}));
    }
}

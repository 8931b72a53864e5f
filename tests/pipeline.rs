// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Full pipeline: validator, orchestrator over HTTP, session, heatmap, report.

mod common;

use std::sync::Arc;
use std::time::Duration;

use forgecheck::config::ServiceConfig;
use forgecheck::report;
use forgecheck::{
    run_orchestrator, AnalysisOrchestrator, AnalysisTransport, CandidateFile, DisplayPoint,
    DisplayScale, FileValidator, HttpTransport, JobStage, JobUpdate, OfflineTransport,
    OrchestratorSettings, ResultAggregator, ResultSource, SessionState, SignalKind, Verdict,
};

use common::StubConfig;

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        budget: Duration::from_secs(10),
        poll_interval: Duration::from_millis(10),
    }
}

/// Helper: analyse one PNG through `transport` and return the final session
/// plus every stage seen, in order.
async fn analyze(transport: Arc<dyn AnalysisTransport>) -> (SessionState, Vec<(JobStage, u8)>) {
    let document = FileValidator::default()
        .validate(&CandidateFile::new("invoice.png", Some("image/png".to_string()), 8))
        .unwrap();
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        transport,
        ResultAggregator::default(),
        settings(),
    ));
    let mut updates = orchestrator.take_updates().unwrap();
    let runner = tokio::spawn(run_orchestrator(Arc::clone(&orchestrator)));

    orchestrator.submit(document, vec![0; 8]).await.unwrap();

    let mut session = SessionState::new();
    let mut stages = Vec::new();
    while let Some(update) = updates.recv().await {
        if let JobUpdate::Stage { stage, progress, .. } = &update {
            stages.push((*stage, *progress));
        }
        let done = matches!(update, JobUpdate::Completed { .. });
        assert!(session.apply(update));
        if done {
            break;
        }
    }

    orchestrator.shutdown().await.unwrap();
    runner.await.unwrap().unwrap();
    (session, stages)
}

fn http(base_url: String) -> Arc<dyn AnalysisTransport> {
    let config = ServiceConfig {
        base_url,
        ..ServiceConfig::default()
    };
    Arc::new(HttpTransport::new(&config).unwrap())
}

#[tokio::test]
async fn test_live_analysis_end_to_end() {
    let stub = common::spawn(StubConfig {
        pending_polls: 3,
        ..StubConfig::default()
    })
    .await;
    let (session, stages) = analyze(http(stub.base_url())).await;

    let progress: Vec<u8> = stages.iter().map(|(_, p)| *p).collect();
    assert_eq!(progress, vec![0, 25, 33, 66, 80, 90, 100]);
    assert_eq!(stages.last().unwrap().0, JobStage::Done);

    let result = session.current_result().unwrap();
    assert_eq!(result.source(), ResultSource::Live);
    assert_eq!(result.overall_confidence(), 85);
    assert_eq!(result.verdict(), Verdict::Tampered);
    assert_eq!(result.signal(SignalKind::Ocr).unwrap().confidence(), 75);

    // ELA region first, then the overlapping OCR region.
    assert_eq!(session.regions().len(), 2);
    let hit = session
        .hit_test(DisplayPoint::new(150.0, 180.0), DisplayScale::default())
        .unwrap();
    assert_eq!(hit.signal, SignalKind::Ela);
    assert_eq!(hit.confidence, 90);
    assert!(session
        .hit_test(DisplayPoint::new(500.0, 500.0), DisplayScale::default())
        .is_none());
}

#[tokio::test]
async fn test_report_round_trip_after_live_analysis() {
    let stub = common::spawn(StubConfig::default()).await;
    let (session, _) = analyze(http(stub.base_url())).await;
    let result = session.current_result().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = report::write_report(dir.path(), Some(result)).unwrap();
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        format!("report_{}.json", result.document_id())
    );

    let restored = report::parse_report(&std::fs::read(&path).unwrap())
        .unwrap()
        .into_aggregate()
        .unwrap();
    assert_eq!(restored.overall_confidence(), result.overall_confidence());
    assert_eq!(restored.uncertainty(), result.uncertainty());
    assert_eq!(restored.verdict(), result.verdict());

    let mut reopened = SessionState::new();
    reopened.load_result(restored);
    assert!(reopened
        .hit_test(DisplayPoint::new(150.0, 180.0), DisplayScale::default())
        .is_some());
}

#[tokio::test]
async fn test_upload_failure_yields_synthetic_result() {
    let stub = common::spawn(StubConfig {
        upload_status: 500,
        ..StubConfig::default()
    })
    .await;
    let (session, stages) = analyze(http(stub.base_url())).await;

    assert_eq!(stages.last().unwrap().0, JobStage::Failed);
    assert_eq!(stub.poll_count(), 0);
    let result = session.current_result().unwrap();
    assert_eq!(result.source(), ResultSource::Synthetic);
    assert_eq!(result.verdict(), Verdict::from_confidence(result.overall_confidence()));
    assert!(session.export_report().is_ok());
}

#[tokio::test]
async fn test_service_processing_error_yields_synthetic_result() {
    let stub = common::spawn(StubConfig {
        pending_polls: 0,
        process_body: common::service_error_body(),
        ..StubConfig::default()
    })
    .await;
    let (session, stages) = analyze(http(stub.base_url())).await;

    assert_eq!(stages.last(), Some(&(JobStage::Failed, 33)));
    let result = session.current_result().unwrap();
    assert_eq!(result.source(), ResultSource::Synthetic);
    assert!(result
        .signals()
        .values()
        .all(|s| s.status() == forgecheck::SignalStatus::Completed));
}

#[tokio::test]
async fn test_offline_transport_yields_synthetic_result() {
    let (session, stages) = analyze(Arc::new(OfflineTransport)).await;
    assert_eq!(
        stages,
        vec![(JobStage::Pending, 0), (JobStage::Uploading, 25), (JobStage::Failed, 25)]
    );
    assert!(session.current_result().unwrap().is_synthetic());
    assert!(!session.regions().is_empty());
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Session state: the latest job, its result and the heatmap built from it.
//!
//! The session is a passive observer. It only changes through
//! [`SessionState::apply`] with updates from the orchestrator (or
//! [`SessionState::load_result`] for a saved report) and never touches the
//! domain values it holds.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::aggregate::AggregateResult;
use crate::heatmap::{DisplayPoint, DisplayScale, HeatmapRegion, HeatmapRegionIndex};
use crate::orchestrator::{JobStage, JobUpdate};
use crate::report::{self, ReportError};

/// What the session knows about the current job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub document_id: String,
    pub stage: JobStage,
    pub progress: u8,
}

#[derive(Debug, Default)]
pub struct SessionState {
    current_job: Option<JobSnapshot>,
    current_result: Option<Arc<AggregateResult>>,
    regions: HeatmapRegionIndex,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an orchestrator update. Returns `false` when the update belongs
    /// to a job other than the current one and was ignored.
    pub fn apply(&mut self, update: JobUpdate) -> bool {
        match update {
            JobUpdate::Stage {
                job_id,
                document_id,
                stage,
                progress,
            } => {
                let is_current = self.current_job.as_ref().map(|j| j.job_id == job_id);
                match is_current {
                    Some(true) => {
                        if let Some(job) = self.current_job.as_mut() {
                            job.stage = stage;
                            job.progress = progress;
                        }
                        true
                    }
                    _ if stage == JobStage::Pending => {
                        self.current_job = Some(JobSnapshot {
                            job_id,
                            document_id,
                            stage,
                            progress,
                        });
                        self.current_result = None;
                        self.regions.clear();
                        true
                    }
                    _ => {
                        debug!(job = %job_id, "ignoring update for inactive job");
                        false
                    }
                }
            }
            JobUpdate::Completed { job_id, result } => {
                let is_current = self
                    .current_job
                    .as_ref()
                    .map(|j| j.job_id == job_id)
                    .unwrap_or(false);
                if !is_current {
                    debug!(job = %job_id, "ignoring result for inactive job");
                    return false;
                }
                self.regions.rebuild(&result);
                self.current_result = Some(result);
                true
            }
        }
    }

    /// Show a result that did not come from a job, e.g. a saved report.
    pub fn load_result(&mut self, result: AggregateResult) {
        self.current_job = None;
        self.regions.rebuild(&result);
        self.current_result = Some(Arc::new(result));
    }

    pub fn current_job(&self) -> Option<&JobSnapshot> {
        self.current_job.as_ref()
    }

    pub fn current_result(&self) -> Option<&AggregateResult> {
        self.current_result.as_deref()
    }

    pub fn regions(&self) -> &HeatmapRegionIndex {
        &self.regions
    }

    /// True once the current job is DONE, or FAILED.
    pub fn is_finished(&self) -> bool {
        self.current_job
            .as_ref()
            .map(|j| j.stage.is_terminal())
            .unwrap_or(false)
    }

    pub fn hit_test(&self, point: DisplayPoint, scale: DisplayScale) -> Option<&HeatmapRegion> {
        self.regions.hit_test(point, scale)
    }

    /// Serialize the current result as a report.
    pub fn export_report(&self) -> Result<Vec<u8>, ReportError> {
        report::serialize(self.current_result())
    }
}

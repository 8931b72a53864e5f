// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! The analysis job state machine.
//!
//! Stages advance strictly in order, one step at a time:
//!
//! ```text
//! PENDING -> UPLOADING -> RUNNING_ELA -> RUNNING_OCR -> RUNNING_METADATA -> AGGREGATING -> DONE
//! ```
//!
//! FAILED is reachable from any non-terminal stage. DONE and FAILED are
//! terminal. Progress never decreases and is 100 only at DONE.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::signal::SignalKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    Pending,
    Uploading,
    RunningEla,
    RunningOcr,
    RunningMetadata,
    Aggregating,
    Done,
    Failed,
}

impl JobStage {
    /// Progress reported on entering this stage. FAILED has none of its own.
    pub fn progress(&self) -> Option<u8> {
        match self {
            JobStage::Pending => Some(0),
            JobStage::Uploading => Some(25),
            JobStage::RunningEla => Some(33),
            JobStage::RunningOcr => Some(66),
            JobStage::RunningMetadata => Some(80),
            JobStage::Aggregating => Some(90),
            JobStage::Done => Some(100),
            JobStage::Failed => None,
        }
    }

    /// The stage that follows on success, if any.
    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::Pending => Some(JobStage::Uploading),
            JobStage::Uploading => Some(JobStage::RunningEla),
            JobStage::RunningEla => Some(JobStage::RunningOcr),
            JobStage::RunningOcr => Some(JobStage::RunningMetadata),
            JobStage::RunningMetadata => Some(JobStage::Aggregating),
            JobStage::Aggregating => Some(JobStage::Done),
            JobStage::Done | JobStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }

    /// The signal whose result this stage is waiting for.
    pub fn awaited_signal(&self) -> Option<SignalKind> {
        match self {
            JobStage::RunningEla => Some(SignalKind::Ela),
            JobStage::RunningOcr => Some(SignalKind::Ocr),
            JobStage::RunningMetadata => Some(SignalKind::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStage::Pending => "PENDING",
            JobStage::Uploading => "UPLOADING",
            JobStage::RunningEla => "RUNNING_ELA",
            JobStage::RunningOcr => "RUNNING_OCR",
            JobStage::RunningMetadata => "RUNNING_METADATA",
            JobStage::Aggregating => "AGGREGATING",
            JobStage::Done => "DONE",
            JobStage::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct StageError {
    pub from: JobStage,
    pub to: JobStage,
}

/// One analysis run for one document. Owned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisJob {
    pub job_id: String,
    pub document_id: String,
    stage: JobStage,
    progress: u8,
    #[serde(skip)]
    started: Instant,
}

impl AnalysisJob {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            stage: JobStage::Pending,
            progress: 0,
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to `to`, which must be the next stage in sequence (or FAILED).
    pub fn advance(&mut self, to: JobStage) -> Result<(), StageError> {
        let allowed = if to == JobStage::Failed {
            !self.stage.is_terminal()
        } else {
            self.stage.next() == Some(to)
        };
        if !allowed {
            return Err(StageError {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        if let Some(p) = to.progress() {
            self.progress = self.progress.max(p);
        }
        Ok(())
    }

    /// Move to the next stage in sequence. Returns the new stage.
    pub fn step(&mut self) -> Result<JobStage, StageError> {
        let to = self.stage.next().ok_or(StageError {
            from: self.stage,
            to: self.stage,
        })?;
        self.advance(to)?;
        Ok(to)
    }

    pub fn fail(&mut self) -> Result<(), StageError> {
        self.advance(JobStage::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_walk_is_monotonic() {
        let mut job = AnalysisJob::new("doc");
        assert_eq!(job.stage(), JobStage::Pending);
        assert_eq!(job.progress(), 0);

        let mut seen = vec![(job.stage(), job.progress())];
        while !job.is_terminal() {
            job.step().unwrap();
            seen.push((job.stage(), job.progress()));
        }
        let stages: Vec<JobStage> = seen.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            stages,
            vec![
                JobStage::Pending,
                JobStage::Uploading,
                JobStage::RunningEla,
                JobStage::RunningOcr,
                JobStage::RunningMetadata,
                JobStage::Aggregating,
                JobStage::Done,
            ]
        );
        let progress: Vec<u8> = seen.iter().map(|(_, p)| *p).collect();
        assert_eq!(progress, vec![0, 25, 33, 66, 80, 90, 100]);
        assert!(stages.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_skipping_or_revisiting_rejected() {
        let mut job = AnalysisJob::new("doc");
        assert_eq!(
            job.advance(JobStage::RunningEla),
            Err(StageError {
                from: JobStage::Pending,
                to: JobStage::RunningEla
            })
        );
        job.advance(JobStage::Uploading).unwrap();
        job.advance(JobStage::RunningEla).unwrap();
        assert!(job.advance(JobStage::Uploading).is_err());
        assert!(job.advance(JobStage::RunningEla).is_err());
        assert!(job.advance(JobStage::Done).is_err());
        assert_eq!(job.stage(), JobStage::RunningEla);
    }

    #[test]
    fn test_failed_is_terminal_and_keeps_progress() {
        let mut job = AnalysisJob::new("doc");
        job.step().unwrap();
        job.step().unwrap();
        job.fail().unwrap();
        assert_eq!(job.stage(), JobStage::Failed);
        assert_eq!(job.progress(), 33);
        assert!(job.fail().is_err());
        assert!(job.step().is_err());
    }

    #[test]
    fn test_done_is_terminal() {
        let mut job = AnalysisJob::new("doc");
        while job.step().is_ok() {}
        assert_eq!(job.stage(), JobStage::Done);
        assert!(job.fail().is_err());
    }

    #[test]
    fn test_awaited_signals() {
        assert_eq!(JobStage::RunningEla.awaited_signal(), Some(SignalKind::Ela));
        assert_eq!(JobStage::RunningOcr.awaited_signal(), Some(SignalKind::Ocr));
        assert_eq!(JobStage::RunningMetadata.awaited_signal(), Some(SignalKind::Metadata));
        assert_eq!(JobStage::Uploading.awaited_signal(), None);
    }

    #[test]
    fn test_job_ids_unique() {
        assert_ne!(AnalysisJob::new("a").job_id, AnalysisJob::new("a").job_id);
    }
}

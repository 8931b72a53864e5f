// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Analysis orchestrator: drives one [`AnalysisJob`] at a time from upload to
//! an [`AggregateResult`].
//!
//! The loop in [`run_orchestrator`] owns all job state changes. Callers send
//! commands (submit, cancel) and network tasks send completion events, both
//! through channels; every event carries the job id it belongs to and events
//! for anything but the current job are dropped. Observers receive
//! [`JobUpdate`]s in stage order on a single channel.
//!
//! Transport failures, malformed signal output and running past the time
//! budget all end the job in FAILED with a synthetic result. Cancellation ends
//! it in FAILED with no result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

pub mod fallback;
pub mod job;

pub use job::{AnalysisJob, JobStage, StageError};

use crate::aggregate::{AggregateResult, ResultAggregator, ResultSource};
use crate::config::Config;
use crate::document::Document;
use crate::signal::{SignalKind, SignalResult};
use crate::transport::{AnalysisTransport, PollStatus, UploadReceipt};

const CHANNEL_CAPACITY: usize = 100;

/// Timing knobs of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Wall-clock budget from submit to DONE.
    pub budget: Duration,
    /// Delay between polls while the service is still processing.
    pub poll_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(20),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            budget: config.analysis.budget(),
            poll_interval: config.service.poll_interval(),
        }
    }
}

/// Returned by [`AnalysisOrchestrator::submit`]; identifies the job for cancellation.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub document_id: String,
    cancel: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Notification sent to the observer.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Stage {
        job_id: String,
        document_id: String,
        stage: JobStage,
        progress: u8,
    },
    /// Sent once per job, after DONE or after FAILED on the fallback path.
    Completed {
        job_id: String,
        result: Arc<AggregateResult>,
    },
}

impl JobUpdate {
    fn stage(job: &AnalysisJob) -> Self {
        JobUpdate::Stage {
            job_id: job.job_id.clone(),
            document_id: job.document_id.clone(),
            stage: job.stage(),
            progress: job.progress(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobUpdate::Stage { job_id, .. } | JobUpdate::Completed { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug)]
struct Submission {
    job: AnalysisJob,
    document: Document,
    content: Vec<u8>,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
enum Command {
    Submit(Submission),
    Cancel { job_id: String },
    Shutdown,
}

/// Completion notifications from the network and timeout tasks.
#[derive(Debug)]
enum JobEvent {
    Uploaded { job_id: String, receipt: UploadReceipt },
    SignalReady { job_id: String, signal: SignalResult },
    TransportFailed { job_id: String, error: String },
    TimedOut { job_id: String },
}

impl JobEvent {
    fn job_id(&self) -> &str {
        match self {
            JobEvent::Uploaded { job_id, .. }
            | JobEvent::SignalReady { job_id, .. }
            | JobEvent::TransportFailed { job_id, .. }
            | JobEvent::TimedOut { job_id } => job_id,
        }
    }
}

/// The job currently owned by the orchestrator, with signals received so far.
struct LiveJob {
    job: AnalysisJob,
    cancel: Arc<AtomicBool>,
    /// Signals that arrived before their stage.
    held: BTreeMap<SignalKind, SignalResult>,
    /// Signals whose stage has completed.
    ingested: BTreeMap<SignalKind, SignalResult>,
}

impl LiveJob {
    fn enter(&mut self, to: JobStage, updates: &mut Vec<JobUpdate>) -> bool {
        match self.job.advance(to) {
            Ok(()) => {
                debug!(
                    job = %self.job.job_id,
                    stage = %to,
                    progress = self.job.progress(),
                    "job stage"
                );
                updates.push(JobUpdate::stage(&self.job));
                true
            }
            Err(e) => {
                error!(job = %self.job.job_id, "{}", e);
                false
            }
        }
    }
}

pub struct AnalysisOrchestrator {
    transport: Arc<dyn AnalysisTransport>,
    aggregator: ResultAggregator,
    settings: OrchestratorSettings,
    current: Mutex<Option<LiveJob>>,
    command_tx: mpsc::Sender<Command>,
    command_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    event_tx: mpsc::Sender<JobEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<JobEvent>>>,
    update_tx: mpsc::Sender<JobUpdate>,
    update_rx: Mutex<Option<mpsc::Receiver<JobUpdate>>>,
}

impl AnalysisOrchestrator {
    pub fn new(
        transport: Arc<dyn AnalysisTransport>,
        aggregator: ResultAggregator,
        settings: OrchestratorSettings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (update_tx, update_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            transport,
            aggregator,
            settings,
            current: Mutex::new(None),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            update_tx,
            update_rx: Mutex::new(Some(update_rx)),
        }
    }

    /// Take the observer end of the update channel. Only the first call gets it.
    /// Updates are dropped, not queued, once the channel is full.
    pub fn take_updates(&self) -> Option<mpsc::Receiver<JobUpdate>> {
        lock(&self.update_rx).take()
    }

    /// Snapshot of the current job, if any.
    pub fn current_job(&self) -> Option<AnalysisJob> {
        lock(&self.current).as_ref().map(|live| live.job.clone())
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Start analysing `document`. Supersedes any job still running.
    pub async fn submit(&self, document: Document, content: Vec<u8>) -> anyhow::Result<JobHandle> {
        let job = AnalysisJob::new(document.id.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = JobHandle {
            job_id: job.job_id.clone(),
            document_id: document.id.clone(),
            cancel: Arc::clone(&cancel),
        };
        self.command_tx
            .send(Command::Submit(Submission {
                job,
                document,
                content,
                cancel,
            }))
            .await
            .context("orchestrator is not running")?;
        Ok(handle)
    }

    /// Request cancellation. In-flight network calls are not aborted; their
    /// results are ignored.
    pub async fn cancel(&self, handle: &JobHandle) -> anyhow::Result<()> {
        handle.cancel.store(true, Ordering::SeqCst);
        self.command_tx
            .send(Command::Cancel {
                job_id: handle.job_id.clone(),
            })
            .await
            .context("orchestrator is not running")?;
        Ok(())
    }

    /// Stop the orchestrator loop after the commands already queued.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .context("orchestrator is not running")?;
        Ok(())
    }

    fn start_job(&self, submission: Submission) -> Vec<JobUpdate> {
        let Submission {
            job,
            document,
            content,
            cancel,
        } = submission;
        let mut updates = Vec::new();
        let mut current = lock(&self.current);

        if let Some(prev) = current.as_mut() {
            if !prev.job.is_terminal() {
                info!(job = %prev.job.job_id, "superseded by new submission");
                prev.cancel.store(true, Ordering::SeqCst);
                prev.enter(JobStage::Failed, &mut updates);
            }
        }

        info!(
            job = %job.job_id,
            document = %document.id,
            name = %document.display_name,
            transport = self.transport.name(),
            "analysis submitted"
        );
        let mut live = LiveJob {
            job,
            cancel: Arc::clone(&cancel),
            held: BTreeMap::new(),
            ingested: BTreeMap::new(),
        };
        updates.push(JobUpdate::stage(&live.job));
        live.enter(JobStage::Uploading, &mut updates);
        let job_id = live.job.job_id.clone();
        *current = Some(live);
        drop(current);

        tokio::spawn(drive_job(
            Arc::clone(&self.transport),
            job_id.clone(),
            document,
            content,
            cancel,
            self.settings.poll_interval,
            self.event_tx.clone(),
        ));

        // Timeout watcher
        let events = self.event_tx.clone();
        let budget = self.settings.budget;
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let _ = events.send(JobEvent::TimedOut { job_id }).await;
        });

        updates
    }

    fn cancel_job(&self, job_id: &str) -> Vec<JobUpdate> {
        let mut updates = Vec::new();
        let mut current = lock(&self.current);
        match current.as_mut() {
            Some(live) if live.job.job_id == job_id && !live.job.is_terminal() => {
                info!(job = %job_id, stage = %live.job.stage(), "analysis cancelled");
                live.cancel.store(true, Ordering::SeqCst);
                live.enter(JobStage::Failed, &mut updates);
            }
            _ => debug!(job = %job_id, "cancel for inactive job ignored"),
        }
        updates
    }

    fn handle_event(&self, event: JobEvent) -> Vec<JobUpdate> {
        let mut updates = Vec::new();
        let mut current = lock(&self.current);
        let live = match current.as_mut() {
            Some(live) if live.job.job_id == event.job_id() && !live.job.is_terminal() => live,
            _ => {
                debug!(job = %event.job_id(), "dropping stale event");
                return updates;
            }
        };

        match event {
            JobEvent::Uploaded { receipt, .. } => {
                debug!(
                    job = %live.job.job_id,
                    service_document = %receipt.document_id,
                    "upload accepted"
                );
                if live.enter(JobStage::RunningEla, &mut updates) {
                    self.drain_signals(live, &mut updates);
                }
            }
            JobEvent::SignalReady { signal, .. } => {
                let kind = signal.kind();
                if live.held.contains_key(&kind) || live.ingested.contains_key(&kind) {
                    debug!(job = %live.job.job_id, signal = %kind, "duplicate signal dropped");
                } else {
                    live.held.insert(kind, signal);
                    self.drain_signals(live, &mut updates);
                }
            }
            JobEvent::TransportFailed { error, .. } => {
                warn!(job = %live.job.job_id, "analysis service failed, using synthetic result: {}", error);
                self.fall_back(live, &mut updates);
            }
            JobEvent::TimedOut { .. } => {
                warn!(
                    job = %live.job.job_id,
                    budget_secs = self.settings.budget.as_secs(),
                    "analysis exceeded its time budget, using synthetic result"
                );
                self.fall_back(live, &mut updates);
            }
        }
        updates
    }

    /// Ingest held signals in stage order, then aggregate once all three are in.
    fn drain_signals(&self, live: &mut LiveJob, updates: &mut Vec<JobUpdate>) {
        while let Some(kind) = live.job.stage().awaited_signal() {
            let Some(signal) = live.held.remove(&kind) else {
                break;
            };
            live.ingested.insert(kind, signal);
            let Some(next) = live.job.stage().next() else {
                break;
            };
            if !live.enter(next, updates) {
                return;
            }
        }

        if live.job.stage() != JobStage::Aggregating {
            return;
        }
        let signals = std::mem::take(&mut live.ingested);
        let result = self
            .aggregator
            .aggregate(&live.job.document_id, signals, ResultSource::Live)
            .with_processing_time(live.job.elapsed());
        if live.enter(JobStage::Done, updates) {
            info!(
                job = %live.job.job_id,
                confidence = result.overall_confidence(),
                verdict = %result.verdict(),
                "analysis complete"
            );
            updates.push(JobUpdate::Completed {
                job_id: live.job.job_id.clone(),
                result: Arc::new(result),
            });
        }
    }

    fn fall_back(&self, live: &mut LiveJob, updates: &mut Vec<JobUpdate>) {
        live.cancel.store(true, Ordering::SeqCst);
        if !live.enter(JobStage::Failed, updates) {
            return;
        }
        let result = fallback::synthetic_result(&self.aggregator, &live.job.document_id)
            .with_processing_time(live.job.elapsed());
        info!(
            job = %live.job.job_id,
            confidence = result.overall_confidence(),
            verdict = %result.verdict(),
            "synthetic result issued"
        );
        updates.push(JobUpdate::Completed {
            job_id: live.job.job_id.clone(),
            result: Arc::new(result),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Upload, then poll until the signals are ready. Stops quietly once the job
/// is cancelled or superseded.
async fn drive_job(
    transport: Arc<dyn AnalysisTransport>,
    job_id: String,
    document: Document,
    content: Vec<u8>,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
    events: mpsc::Sender<JobEvent>,
) {
    let cancelled = || cancel.load(Ordering::SeqCst);
    if cancelled() {
        return;
    }

    let receipt = match transport.upload(&document, content).await {
        Ok(receipt) => receipt,
        Err(e) => {
            let _ = events
                .send(JobEvent::TransportFailed {
                    job_id,
                    error: e.to_string(),
                })
                .await;
            return;
        }
    };
    if cancelled() {
        return;
    }
    let _ = events
        .send(JobEvent::Uploaded {
            job_id: job_id.clone(),
            receipt: receipt.clone(),
        })
        .await;

    loop {
        if cancelled() {
            return;
        }
        match transport.poll(&receipt).await {
            Ok(PollStatus::Pending) => tokio::time::sleep(poll_interval).await,
            Ok(PollStatus::Complete(signals)) => {
                for signal in signals {
                    let _ = events
                        .send(JobEvent::SignalReady {
                            job_id: job_id.clone(),
                            signal,
                        })
                        .await;
                }
                return;
            }
            Err(e) => {
                let _ = events
                    .send(JobEvent::TransportFailed {
                        job_id,
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

/// Main orchestrator loop. Takes the receivers out of the orchestrator (via
/// the `Mutex<Option<>>` pattern) and runs until [`AnalysisOrchestrator::shutdown`].
pub async fn run_orchestrator(orchestrator: Arc<AnalysisOrchestrator>) -> anyhow::Result<()> {
    let mut command_rx = lock(&orchestrator.command_rx)
        .take()
        .context("run_orchestrator called more than once")?;
    let mut event_rx = lock(&orchestrator.event_rx)
        .take()
        .context("run_orchestrator called more than once")?;

    loop {
        let updates = tokio::select! {
            Some(command) = command_rx.recv() => match command {
                Command::Submit(submission) => orchestrator.start_job(submission),
                Command::Cancel { job_id } => orchestrator.cancel_job(&job_id),
                Command::Shutdown => {
                    if let Some(live) = lock(&orchestrator.current).as_ref() {
                        live.cancel.store(true, Ordering::SeqCst);
                    }
                    debug!("orchestrator shutting down");
                    break;
                }
            },
            Some(event) = event_rx.recv() => orchestrator.handle_event(event),
            else => break,
        };

        // Never block the loop on the observer: cancel, timeouts and shutdown
        // must still be processed when nobody reads updates.
        for update in updates {
            match orchestrator.update_tx.try_send(update) {
                Ok(()) => {}
                Err(TrySendError::Full(update)) => {
                    warn!(job = %update.job_id(), "observer not keeping up, job update dropped")
                }
                Err(TrySendError::Closed(_)) => debug!("job update dropped, no observer"),
            }
        }
    }
    Ok(())
}

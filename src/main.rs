// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! forgecheck command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use forgecheck::heatmap::HeatmapRegion;
use forgecheck::render::{self, print_one};
use forgecheck::report;
use forgecheck::session::JobSnapshot;
use forgecheck::{
    run_orchestrator, AggregateResult, AnalysisOrchestrator, AnalysisTransport, CandidateFile,
    Config, DisplayPoint, DisplayScale, FileValidator, HttpTransport, JobStage, JobUpdate,
    OfflineTransport, OrchestratorSettings, ResultAggregator, SessionState, ValidationError,
};

const EXIT_REJECTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "forgecheck", version, about = "Document forgery analysis client")]
struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[arg(long, global = true, help = "Config file (default: ./forgecheck.toml, /etc/forgecheck/config.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override [service] base_url")]
    service_url: Option<String>,
    #[arg(long, global = true, help = "Override [analysis] budget_secs")]
    budget_secs: Option<u64>,
    #[arg(short, long, global = true, help = "Debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a file would be accepted for analysis.
    Validate { file: PathBuf },
    /// Analyse a document and write its report.
    Analyze {
        file: PathBuf,
        #[arg(long, help = "Skip the service and produce a synthetic result")]
        offline: bool,
        #[arg(long, help = "Directory for the report (default: [report] output_dir)")]
        report_dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        no_report: bool,
    },
    /// Hit-test a display point against the regions of a saved report.
    Inspect {
        report: PathBuf,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
        #[arg(long, default_value_t = 1.0)]
        scale_x: f64,
        #[arg(long, default_value_t = 1.0)]
        scale_y: f64,
    },
    /// Query the analysis service health endpoint.
    Health,
}

#[derive(Serialize)]
struct AnalyzeOut<'a> {
    job: Option<&'a JobSnapshot>,
    result: Option<&'a AggregateResult>,
    regions: &'a [HeatmapRegion],
    report_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct InspectOut {
    document_id: String,
    point: [f64; 2],
    hit: Option<HeatmapRegion>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "forgecheck=debug" } else { "forgecheck=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let (mut config, path) = Config::discover(cli.config.as_deref())?;
    match path {
        Some(p) => debug!("loaded config from {}", p.display()),
        None => debug!("no config file found, using defaults"),
    }
    if let Some(url) = &cli.service_url {
        config.service.base_url = url.clone();
    }
    if let Some(secs) = cli.budget_secs {
        config.analysis.budget_secs = secs;
    }
    config.validate().context("Invalid configuration after overrides")?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let rejected = e.downcast_ref::<ValidationError>().is_some();
            if json {
                let body = serde_json::json!({ "ok": false, "error": format!("{:#}", e) });
                println!("{}", body);
            } else if rejected {
                eprintln!("rejected: {}", e);
            } else {
                error!("{:#}", e);
            }
            if rejected {
                ExitCode::from(EXIT_REJECTED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let json = cli.json;
    let validator = FileValidator::new(config.analysis.max_upload_bytes);

    match cli.command {
        Commands::Validate { file } => {
            let candidate = CandidateFile::from_path(&file)?;
            let document = validator.validate(&candidate)?;
            print_one(json, &document, |d| render::document_line(d))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze {
            file,
            offline,
            report_dir,
            no_report,
        } => {
            let candidate = CandidateFile::from_path(&file)?;
            let document = validator.validate(&candidate)?;
            if !json {
                println!("{}", render::document_line(&document));
            }
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let transport: Arc<dyn AnalysisTransport> = if offline {
                Arc::new(OfflineTransport)
            } else {
                Arc::new(HttpTransport::new(&config.service)?)
            };
            let session = analyze(&config, transport, document, content, json).await?;

            let Some(result) = session.current_result() else {
                bail!("analysis cancelled, no result");
            };
            let report_path = if no_report {
                None
            } else {
                let dir = report_dir.unwrap_or_else(|| config.report.output_dir.clone());
                Some(report::write_report(&dir, Some(result))?)
            };

            let out = AnalyzeOut {
                job: session.current_job(),
                result: Some(result),
                regions: session.regions().regions(),
                report_path,
            };
            print_one(json, out, |o| {
                let mut text = render::session_view(&session);
                if let Some(p) = &o.report_path {
                    text.push_str(&format!("\n\nReport written to {}", p.display()));
                }
                text
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect {
            report: path,
            x,
            y,
            scale_x,
            scale_y,
        } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read report {}", path.display()))?;
            let result = report::parse_report(&bytes)?.into_aggregate()?;
            let document_id = result.document_id().to_string();
            let mut session = SessionState::new();
            session.load_result(result);

            let point = DisplayPoint::new(x, y);
            let hit = session.hit_test(point, DisplayScale::new(scale_x, scale_y)).cloned();
            let out = InspectOut {
                document_id,
                point: [x, y],
                hit,
            };
            print_one(json, out, |o| render::hit_line(point, o.hit.as_ref()))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let transport = HttpTransport::new(&config.service)?;
            let health = transport
                .health()
                .await
                .with_context(|| format!("Health check against {} failed", transport.base_url()))?;
            let healthy = health.is_healthy();
            print_one(json, health, render::health_line)?;
            Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

/// Run one document through the orchestrator, printing progress as it goes.
/// Ctrl-C cancels the job.
async fn analyze(
    config: &Config,
    transport: Arc<dyn AnalysisTransport>,
    document: forgecheck::Document,
    content: Vec<u8>,
    json: bool,
) -> Result<SessionState> {
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        transport,
        ResultAggregator::new(config.aggregation.weights()?),
        OrchestratorSettings::from_config(config),
    ));
    let mut updates = orchestrator
        .take_updates()
        .context("update channel already taken")?;
    let runner = tokio::spawn(run_orchestrator(Arc::clone(&orchestrator)));

    let handle = orchestrator.submit(document, content).await?;
    let mut session = SessionState::new();
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                let completed = matches!(update, JobUpdate::Completed { .. });
                if session.apply(update) && !completed && !json {
                    if let Some(job) = session.current_job() {
                        println!("{}", render::progress_line(job));
                    }
                }
                let failed = session
                    .current_job()
                    .map(|j| j.stage == JobStage::Failed)
                    .unwrap_or(false);
                if completed || (failed && cancel_requested) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                warn!("interrupted, cancelling analysis");
                orchestrator.cancel(&handle).await?;
                cancel_requested = true;
            }
        }
    }

    orchestrator.shutdown().await?;
    runner.await.context("orchestrator task panicked")??;
    Ok(session)
}

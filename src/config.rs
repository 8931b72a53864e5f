// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration pointed at a local analysis service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::SignalWeights;
use crate::document::MAX_UPLOAD_BYTES;

/// Searched in order when no explicit config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./forgecheck.toml", "/etc/forgecheck/config.toml"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Analysis service endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    /// Must contain `{document_id}`.
    #[serde(default = "default_process_path")]
    pub process_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Wall-clock budget of one job, from submit to DONE.
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_ela_weight")]
    pub ela_weight: u8,
    #[serde(default = "default_ocr_weight")]
    pub ocr_weight: u8,
    #[serde(default = "default_metadata_weight")]
    pub metadata_weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_base_url() -> String { "http://127.0.0.1:5000".to_string() }
fn default_upload_path() -> String { "/upload".to_string() }
fn default_process_path() -> String { "/process/{document_id}".to_string() }
fn default_health_path() -> String { "/health".to_string() }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_budget_secs() -> u64 { 20 }
fn default_max_upload_bytes() -> u64 { MAX_UPLOAD_BYTES }
fn default_ela_weight() -> u8 { 40 }
fn default_ocr_weight() -> u8 { 30 }
fn default_metadata_weight() -> u8 { 30 }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_path: default_upload_path(),
            process_path: default_process_path(),
            health_path: default_health_path(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            budget_secs: default_budget_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            ela_weight: default_ela_weight(),
            ocr_weight: default_ocr_weight(),
            metadata_weight: default_metadata_weight(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl ServiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AnalysisConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

impl AggregationConfig {
    pub fn weights(&self) -> Result<SignalWeights> {
        SignalWeights::new(self.ela_weight, self.ocr_weight, self.metadata_weight)
            .context("Invalid [aggregation] weights")
    }
}

impl Config {
    /// Parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Load `explicit` if given, otherwise the first existing default path,
    /// otherwise built-in defaults. Returns the path that was used.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        for candidate in DEFAULT_CONFIG_PATHS {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        self.aggregation.weights()?;
        if self.analysis.budget_secs == 0 {
            bail!("analysis.budget_secs must be greater than zero");
        }
        if self.analysis.max_upload_bytes > MAX_UPLOAD_BYTES {
            bail!(
                "analysis.max_upload_bytes {} exceeds the service limit of {}",
                self.analysis.max_upload_bytes,
                MAX_UPLOAD_BYTES
            );
        }
        if self.service.poll_interval_ms == 0 {
            bail!("service.poll_interval_ms must be greater than zero");
        }
        if !self.service.process_path.contains(crate::transport::DOCUMENT_ID_PLACEHOLDER) {
            bail!("service.process_path must contain {{document_id}}");
        }
        Ok(())
    }
}

//! Typed configuration for the compute core.
//!
//! The core is a library with no filesystem or environment surface, so
//! configuration arrives as a TOML *string* supplied by the embedder (or
//! not at all — every field has a default). Unknown fields are ignored to
//! allow forward evolution without warnings. Values that could wedge the
//! runtime (zero workers, absurd histogram bin counts) are clamped at
//! apply time and the raw parsed values retained.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct PoolSection {
    /// Worker count; `None` selects `min(available_parallelism, 8)`.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "PoolSection::default_queue_warn_depth")]
    pub queue_warn_depth: usize,
    #[serde(default = "PoolSection::default_stuck_after_ms")]
    pub stuck_after_ms: u64,
    #[serde(default = "PoolSection::default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default = "PoolSection::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: None,
            queue_warn_depth: Self::default_queue_warn_depth(),
            stuck_after_ms: Self::default_stuck_after_ms(),
            health_interval_ms: Self::default_health_interval_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

impl PoolSection {
    const fn default_queue_warn_depth() -> usize {
        50
    }
    const fn default_stuck_after_ms() -> u64 {
        60_000
    }
    const fn default_health_interval_ms() -> u64 {
        30_000
    }
    const fn default_request_timeout_ms() -> u64 {
        30_000
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchSection {
    /// Whether the accelerator backend is constructed at all.
    #[serde(default = "DispatchSection::default_accelerator")]
    pub accelerator: bool,
    #[serde(default = "DispatchSection::default_health_interval_ms")]
    pub health_interval_ms: u64,
    /// Pending-with-zero-busy threshold that triggers a pool re-init.
    #[serde(default = "DispatchSection::default_restart_pending_threshold")]
    pub restart_pending_threshold: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            accelerator: Self::default_accelerator(),
            health_interval_ms: Self::default_health_interval_ms(),
            restart_pending_threshold: Self::default_restart_pending_threshold(),
        }
    }
}

impl DispatchSection {
    const fn default_accelerator() -> bool {
        true
    }
    const fn default_health_interval_ms() -> u64 {
        30_000
    }
    const fn default_restart_pending_threshold() -> usize {
        8
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarkersSection {
    #[serde(default = "MarkersSection::default_hist_bins")]
    pub hist_bins: usize,
}

impl Default for MarkersSection {
    fn default() -> Self {
        Self {
            hist_bins: Self::default_hist_bins(),
        }
    }
}

impl MarkersSection {
    const fn default_hist_bins() -> usize {
        128
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub markers: MarkersSection,
}

/// Parsed configuration plus the clamped effective values.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub file: ConfigFile,
    pub effective_workers: usize,
    pub effective_hist_bins: usize,
}

const MIN_HIST_BINS: usize = 16;
const MAX_HIST_BINS: usize = 1_024;
const MAX_WORKERS_DEFAULT: usize = 8;

/// Worker count when unconfigured: `min(available_parallelism, 8)`.
pub fn default_workers() -> usize {
    let hw = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    hw.min(MAX_WORKERS_DEFAULT)
}

impl CoreConfig {
    pub fn from_file(file: ConfigFile) -> Self {
        let effective_workers = file.pool.workers.unwrap_or_else(default_workers).max(1);
        let effective_hist_bins = file.markers.hist_bins.clamp(MIN_HIST_BINS, MAX_HIST_BINS);
        Self {
            file,
            effective_workers,
            effective_hist_bins,
        }
    }
}

/// Parse a TOML document into a [`CoreConfig`]. An empty string yields
/// all defaults.
pub fn from_toml_str(raw: &str) -> Result<CoreConfig> {
    let file: ConfigFile = toml::from_str(raw).context("parsing core config TOML")?;
    let config = CoreConfig::from_file(file);
    info!(
        target: "config.load",
        workers = config.effective_workers,
        hist_bins = config.effective_hist_bins,
        accelerator = config.file.dispatch.accelerator,
        "config_applied"
    );
    Ok(config)
}

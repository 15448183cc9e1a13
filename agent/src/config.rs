//! Configuration management for the Vigil agent
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files, with every field carrying a sensible default so an
//! embedder can start the agent with `AgentConfig::default()` alone.

use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Main configuration structure for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Fine-grained sampling cadence (history ring)
    #[serde(default = "CadenceConfig::default_history")]
    pub history: CadenceConfig,

    /// Coarse-grained health-check cadence (problem ring)
    #[serde(default = "CadenceConfig::default_problems")]
    pub problems: CadenceConfig,

    /// Thresholds consumed by the problem analyzer
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

/// Cadence and retention of one sampling loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CadenceConfig {
    /// Milliseconds between successive ticks
    pub interval_ms: u64,

    /// Ring capacity; the oldest entry is evicted past this
    pub max_samples: usize,

    /// Number of consecutive unchanged problem results coalesced into
    /// one retained entry before a heartbeat refresh is forced.
    /// Ignored by the history loop.
    #[serde(default = "default_max_discontinuity")]
    pub max_discontinuity: u64,
}

/// Numeric thresholds for the health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Physical memory used/total percentage that triggers a problem
    pub memory_used_percent: u8,

    /// Swap used/total percentage that triggers a problem
    pub swap_used_percent: u8,

    /// Minimum free disk space in megabytes on each monitored path
    pub min_free_disk_mb: u64,

    /// Paths whose filesystems are watched for free space
    pub disk_paths: Vec<PathBuf>,

    /// GC CPU percentage over the measurement window that triggers
    /// a problem
    pub gc_cpu_percent: u8,
}

fn default_max_discontinuity() -> u64 {
    20
}

impl CadenceConfig {
    /// One-second sampling, keeping the last 150 samples
    pub fn default_history() -> Self {
        Self {
            interval_ms: 1_000,
            max_samples: 150,
            max_discontinuity: default_max_discontinuity(),
        }
    }

    /// Thirty-second health checks, keeping the last 20 snapshots
    pub fn default_problems() -> Self {
        Self {
            interval_ms: 30_000,
            max_samples: 20,
            max_discontinuity: default_max_discontinuity(),
        }
    }

    /// The tick interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate this cadence
    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.interval_ms", section),
                value: "0".to_string(),
            });
        }
        if self.max_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.max_samples", section),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            memory_used_percent: 90,
            swap_used_percent: 50,
            min_free_disk_mb: 100,
            disk_paths: vec![PathBuf::from("/")],
            gc_cpu_percent: 30,
        }
    }
}

impl ThresholdConfig {
    /// Validate threshold ranges
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("thresholds.memory_used_percent", self.memory_used_percent),
            ("thresholds.swap_used_percent", self.swap_used_percent),
            ("thresholds.gc_cpu_percent", self.gc_cpu_percent),
        ] {
            if value > 100 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Minimum free disk space in bytes
    pub fn min_free_disk_bytes(&self) -> u64 {
        self.min_free_disk_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history: CadenceConfig::default_history(),
            problems: CadenceConfig::default_problems(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let config: AgentConfig =
            toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the full configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.history.validate("history")?;
        self.problems.validate("problems")?;
        self.thresholds.validate()?;
        Ok(())
    }
}

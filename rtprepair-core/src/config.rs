use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gaps: GapConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    /// Gap nodes available to one gap set
    pub pool_capacity: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Widest loss burst tracked; older sequence numbers of a wider burst are given up
    pub max_gap_span: u32,
    /// A packet further behind the highest seen than this restarts tracking
    pub max_reorder: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_gap_span: 8192,
            max_reorder: 16384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Synthetic stream replayed by the `rtprepair` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub packets: u64,
    /// Probability that a packet is lost (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a lost packet is later retransmitted (0.0 - 1.0)
    pub repair_rate: f64,
    /// Packets a retransmission lags behind the live edge
    pub repair_delay: u32,
    pub seed: u64,
    pub initial_seq: u32,
    /// Gaps drained per repair request
    pub drain_batch: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            packets: 100_000,
            loss_rate: 0.02,
            repair_rate: 0.9,
            repair_delay: 32,
            seed: 1,
            initial_seq: u32::MAX - 1000,
            drain_batch: 16,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the optional file, then
    /// `RTPREPAIR_*` environment variables (`__` between section and key).
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // RTPREPAIR_GAPS__POOL_CAPACITY, RTPREPAIR_LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("RTPREPAIR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Check value ranges, returning every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.gaps.pool_capacity == 0 {
            errors.push("gaps.pool_capacity must be greater than 0".to_string());
        }
        if u32::try_from(self.gaps.pool_capacity).is_err() {
            errors.push(format!(
                "gaps.pool_capacity must not exceed {}",
                u32::MAX
            ));
        }
        if self.tracker.max_gap_span == 0 {
            errors.push("tracker.max_gap_span must be greater than 0".to_string());
        }
        if self.tracker.max_reorder >= 1 << 31 {
            errors.push("tracker.max_reorder must be below 2^31".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if !(0.0..=1.0).contains(&self.simulation.loss_rate) {
            errors.push("simulation.loss_rate must be within 0.0..=1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.simulation.repair_rate) {
            errors.push("simulation.repair_rate must be within 0.0..=1.0".to_string());
        }
        if self.simulation.drain_batch == 0 {
            errors.push("simulation.drain_batch must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

//! TOML configuration for fleetmedic.
//!
//! Layered model: explicit path, then the `FLEETMEDIC_CONFIG` environment
//! variable, then `/etc/fleetmedic/fleetmedic.toml`, then compiled-in
//! defaults. Every section is optional in the file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::telemetry::FuelPolicy;

pub const CONFIG_ENV: &str = "FLEETMEDIC_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fleetmedic/fleetmedic.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl FleetConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the effective configuration. An explicit path must load;
    /// the environment and system locations fall through on error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Try `FLEETMEDIC_CONFIG`, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FLEETMEDIC_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener and storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// SQLite database file.
    pub db_path: String,
    /// Most recent samples handed to the outlier model per evaluation.
    /// `0` means the whole stored history.
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            db_path: "data/fleetmedic.db".to_string(),
            history_limit: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Outlier model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// The model runs only when the history holds strictly more samples.
    pub min_history: usize,
    /// Expected share of outliers in the training population, in (0, 0.5].
    pub contamination: f64,
    /// Number of isolation trees in the ensemble.
    pub n_estimators: usize,
    /// Subsample size per tree, capped by the history length.
    pub max_samples: usize,
    /// Fixed RNG seed. Unset means a fresh entropy seed per fit.
    pub seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_history: 20,
            contamination: 0.1,
            n_estimators: 100,
            max_samples: 256,
            seed: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            bail!("detector.contamination must be in (0, 0.5], got {}", self.contamination);
        }
        if self.n_estimators == 0 {
            bail!("detector.n_estimators must be at least 1");
        }
        if self.max_samples < 2 {
            bail!("detector.max_samples must be at least 2, got {}", self.max_samples);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub fuel_policy: FuelPolicy,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Ingestion endpoint for remote mode.
    pub target_url: String,
    pub interval_ms: u64,
    pub base_latitude: f64,
    pub base_longitude: f64,
    /// Uniform +/- spread applied to both coordinates.
    pub jitter_degrees: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            target_url: "http://127.0.0.1:8000/api/v1/telemetry".to_string(),
            interval_ms: 5000,
            base_latitude: 17.3850,
            base_longitude: 78.4867,
            jitter_degrees: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

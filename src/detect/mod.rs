//! Anomaly detection and health scoring.
//!
//! The pipeline is: validate -> threshold rules -> outlier model against the
//! history snapshot -> health score -> severity. Everything here is free of
//! I/O; history comes in as an owned or borrowed snapshot.

pub mod engine;
pub mod forest;
pub mod outlier;
pub mod rules;
pub mod score;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::ValidationError;

pub use self::engine::Evaluator;
pub use self::outlier::{IsolationForestDetector, OutlierDetector, OutlierModelManager, OutlierOutcome};
pub use self::rules::{evaluate_rules, RuleOutcome};
pub use self::score::{classify, score};

/// Reason appended when the outlier model flags a sample.
pub const MODEL_REASON: &str = "ML Pattern Detected";

/// Failure to fit the outlier model. Always recovered by the manager: the
/// sample is treated as a non-outlier.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelFitError {
    #[error("cannot fit outlier model on an empty population")]
    EmptyPopulation,

    #[error("feature population has near-zero variance across {samples} samples")]
    DegenerateFeatures { samples: usize },

    #[error("history sample {index} has a non-finite feature")]
    NonFiniteFeature { index: usize },
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("evaluation worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Three-level vehicle condition derived from the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Healthy,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Healthy => "Healthy",
            Severity::Warning => "Warning",
            Severity::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Healthy" => Ok(Severity::Healthy),
            "Warning" => Ok(Severity::Warning),
            "Critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// The complete result of evaluating one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub rule_triggered: bool,
    pub model_triggered: bool,
    /// Whether the history was large and well-formed enough to run the model.
    pub model_evaluated: bool,
    /// Rule reasons in fixed order, then the model reason if any.
    pub reasons: Vec<String>,
    pub health_score: u8,
    pub severity: Severity,
}

impl Verdict {
    /// Display form of the reasons, e.g. `"Overspeed | Low Fuel"`.
    pub fn anomaly_reason(&self) -> String {
        self.reasons.join(" | ")
    }

    pub fn is_anomalous(&self) -> bool {
        self.rule_triggered || self.model_triggered
    }
}

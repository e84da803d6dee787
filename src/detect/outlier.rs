//! Outlier model manager.
//!
//! The model is refit from scratch on every call against the snapshot the
//! caller hands in. No model state survives between calls, so a fixed
//! history, candidate and seed always produce the same flag; the price is a
//! fit proportional to the history size per evaluation. Alternative
//! detectors (incremental, streaming) plug in through [`OutlierDetector`].

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, warn};

use super::forest::{ForestParams, IsolationForest};
use super::ModelFitError;
use crate::config::DetectorConfig;
use crate::telemetry::FeatureVector;

/// A multivariate outlier test over a reference population.
pub trait OutlierDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Fit against `history` and decide whether `candidate` is anomalous.
    fn detect(&self, history: &[FeatureVector], candidate: &FeatureVector) -> Result<bool, ModelFitError>;
}

/// Isolation forest refit per call.
#[derive(Debug, Clone)]
pub struct IsolationForestDetector {
    params: ForestParams,
    seed: Option<u64>,
}

impl IsolationForestDetector {
    pub fn new(params: ForestParams, seed: Option<u64>) -> Self {
        Self { params, seed }
    }

    pub fn from_config(cfg: &DetectorConfig) -> Self {
        Self::new(
            ForestParams {
                n_estimators: cfg.n_estimators,
                max_samples: cfg.max_samples,
                contamination: cfg.contamination,
            },
            cfg.seed,
        )
    }
}

impl OutlierDetector for IsolationForestDetector {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn detect(&self, history: &[FeatureVector], candidate: &FeatureVector) -> Result<bool, ModelFitError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let forest = IsolationForest::fit(history, &self.params, &mut rng)?;
        let score = forest.score(candidate);
        debug!(score, threshold = forest.threshold(), trees = forest.n_trees(), "isolation forest scored candidate");
        Ok(score > forest.threshold())
    }
}

/// Result of one outlier evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutlierOutcome {
    pub is_outlier: bool,
    /// False when the history was too small or the fit failed.
    pub could_evaluate: bool,
}

impl OutlierOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct OutlierModelManager {
    min_history: usize,
    detector: Arc<dyn OutlierDetector>,
}

impl std::fmt::Debug for OutlierModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlierModelManager")
            .field("min_history", &self.min_history)
            .field("detector", &self.detector.name())
            .finish()
    }
}

impl OutlierModelManager {
    pub fn new(min_history: usize, detector: Arc<dyn OutlierDetector>) -> Self {
        Self { min_history, detector }
    }

    pub fn from_config(cfg: &DetectorConfig) -> Self {
        Self::new(cfg.min_history, Arc::new(IsolationForestDetector::from_config(cfg)))
    }

    pub fn min_history(&self) -> usize {
        self.min_history
    }

    /// Score `candidate` against `history`. Never fails: a history at or
    /// below `min_history` or a failed fit yields a non-outlier.
    pub fn evaluate_outlier(&self, history: &[FeatureVector], candidate: &FeatureVector) -> OutlierOutcome {
        if history.len() <= self.min_history {
            debug!(
                history = history.len(),
                min_history = self.min_history,
                "history too small, outlier model skipped"
            );
            return OutlierOutcome::skipped();
        }

        match self.detector.detect(history, candidate) {
            Ok(is_outlier) => OutlierOutcome {
                is_outlier,
                could_evaluate: true,
            },
            Err(e) => {
                warn!(
                    error = %e,
                    detector = self.detector.name(),
                    history = history.len(),
                    "outlier model fit failed, treating sample as typical"
                );
                OutlierOutcome::skipped()
            }
        }
    }
}

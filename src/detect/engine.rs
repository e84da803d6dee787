use tracing::{debug, info};

use crate::config::FleetConfig;
use crate::detect::outlier::OutlierModelManager;
use crate::detect::rules::evaluate_rules;
use crate::detect::score::{classify, score};
use crate::detect::{DetectError, Verdict, MODEL_REASON};
use crate::telemetry::{validate, FeatureVector, FuelPolicy, RawSample, TelemetrySample, ValidationError};

/// The `evaluate(sample, history) -> verdict` entry point.
///
/// Holds only configuration; cloning is cheap and clones share the
/// detector. Safe to call from many tasks at once.
#[derive(Debug, Clone)]
pub struct Evaluator {
    fuel_policy: FuelPolicy,
    outlier: OutlierModelManager,
}

impl Evaluator {
    pub fn new(fuel_policy: FuelPolicy, outlier: OutlierModelManager) -> Self {
        Self { fuel_policy, outlier }
    }

    pub fn from_config(cfg: &FleetConfig) -> Self {
        Self::new(
            cfg.validation.fuel_policy,
            OutlierModelManager::from_config(&cfg.detector),
        )
    }

    pub fn fuel_policy(&self) -> FuelPolicy {
        self.fuel_policy
    }

    pub fn validate(&self, raw: &RawSample) -> Result<TelemetrySample, ValidationError> {
        validate(raw, self.fuel_policy)
    }

    /// Validate `raw` and evaluate it against `history`.
    pub fn evaluate(&self, raw: &RawSample, history: &[FeatureVector]) -> Result<Verdict, ValidationError> {
        let sample = self.validate(raw)?;
        Ok(self.evaluate_sample(&sample, history))
    }

    /// Evaluate an already validated sample. Total over well-formed input.
    pub fn evaluate_sample(&self, sample: &TelemetrySample, history: &[FeatureVector]) -> Verdict {
        let rules = evaluate_rules(sample);
        let outlier = self.outlier.evaluate_outlier(history, &sample.features());

        let health_score = score(sample.speed, sample.temperature, sample.fuel_level, outlier.is_outlier);
        let severity = classify(health_score);

        let mut reasons = rules.reasons;
        if outlier.is_outlier {
            reasons.push(MODEL_REASON.to_string());
        }

        let verdict = Verdict {
            rule_triggered: rules.triggered,
            model_triggered: outlier.is_outlier,
            model_evaluated: outlier.could_evaluate,
            reasons,
            health_score,
            severity,
        };

        if verdict.is_anomalous() {
            info!(
                vehicle = %sample.vehicle_id,
                health_score,
                %severity,
                reasons = %verdict.anomaly_reason(),
                "anomaly detected"
            );
        } else {
            debug!(
                vehicle = %sample.vehicle_id,
                health_score,
                %severity,
                model_evaluated = verdict.model_evaluated,
                "sample evaluated"
            );
        }

        verdict
    }

    /// Run the whole pipeline on the blocking pool so the model fit does not
    /// stall the async executor. `history` is the snapshot taken when the
    /// request began; later appends are not seen.
    pub async fn evaluate_offloaded(
        &self,
        raw: RawSample,
        history: Vec<FeatureVector>,
    ) -> Result<(TelemetrySample, Verdict), DetectError> {
        let evaluator = self.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(TelemetrySample, Verdict), ValidationError> {
            let sample = evaluator.validate(&raw)?;
            let verdict = evaluator.evaluate_sample(&sample, &history);
            Ok((sample, verdict))
        })
        .await??;
        Ok(result)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::from_config(&FleetConfig::default())
    }
}

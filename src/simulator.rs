//! Synthetic telemetry generator.
//!
//! Produces samples with the same shape as a field unit: speed 40-120 km/h,
//! fuel 10-100 %, coolant 60-110 C, and a position jittered around a base
//! coordinate. Samples can be evaluated in-process or POSTed to a running
//! server.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SimulatorConfig;
use crate::detect::{Evaluator, Verdict};
use crate::history::{HistoryProvider, MemoryHistory};
use crate::telemetry::{RawSample, TelemetrySample};

pub struct SampleGenerator {
    rng: StdRng,
    vehicle_id: Option<String>,
    base_latitude: f64,
    base_longitude: f64,
    jitter: f64,
}

impl SampleGenerator {
    /// `seed = None` draws from OS entropy.
    pub fn new(cfg: &SimulatorConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            vehicle_id: None,
            base_latitude: cfg.base_latitude,
            base_longitude: cfg.base_longitude,
            jitter: cfg.jitter_degrees.abs(),
        }
    }

    pub fn for_vehicle(mut self, vehicle_id: impl Into<String>) -> Self {
        self.vehicle_id = Some(vehicle_id.into());
        self
    }

    pub fn next_sample(&mut self) -> RawSample {
        let speed = self.rng.gen_range(40..=120) as f64;
        let fuel_level = self.rng.gen_range(10..=100) as f64;
        let temperature = self.rng.gen_range(60..=110) as f64;
        let (lat_off, lon_off) = if self.jitter > 0.0 {
            (
                self.rng.gen_range(-self.jitter..=self.jitter),
                self.rng.gen_range(-self.jitter..=self.jitter),
            )
        } else {
            (0.0, 0.0)
        };

        let mut raw = RawSample::from_values(
            speed,
            fuel_level,
            temperature,
            self.base_latitude + lat_off,
            self.base_longitude + lon_off,
        );
        raw.vehicle_id = self.vehicle_id.clone();
        raw
    }
}

impl Iterator for SampleGenerator {
    type Item = RawSample;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_sample())
    }
}

/// One simulated step: the accepted sample and its verdict.
#[derive(Debug, Clone, Serialize)]
pub struct SimulatedEvaluation {
    pub sample: TelemetrySample,
    pub verdict: Verdict,
}

/// Evaluate `count` generated samples in-process, each against the history
/// accumulated so far.
pub async fn run_local(
    evaluator: &Evaluator,
    history: &MemoryHistory,
    generator: &mut SampleGenerator,
    count: usize,
) -> Result<Vec<SimulatedEvaluation>> {
    let mut out = Vec::with_capacity(count);
    for raw in generator.by_ref().take(count) {
        let snapshot = history.snapshot(&raw.vehicle_key()).await?;
        let (sample, verdict) = evaluator
            .evaluate_offloaded(raw, snapshot)
            .await
            .context("simulated sample failed evaluation")?;
        history.append(&sample).await;
        out.push(SimulatedEvaluation { sample, verdict });
    }
    Ok(out)
}

/// POST `count` generated samples to `url`, pausing `interval` between sends.
/// Send failures are logged and skipped. Returns the number accepted.
pub async fn run_remote(
    url: &str,
    generator: &mut SampleGenerator,
    count: usize,
    interval: Duration,
) -> Result<usize> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let mut accepted = 0;
    for i in 0..count {
        let raw = generator.next_sample();
        match client.post(url).json(&raw).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                info!(
                    seq = i,
                    severity = %body["data"]["verdict"]["severity"],
                    health_score = %body["data"]["verdict"]["health_score"],
                    "sample sent"
                );
                accepted += 1;
            }
            Ok(resp) => warn!(seq = i, status = %resp.status(), "server rejected sample"),
            Err(e) => warn!(seq = i, error = %e, "failed to send sample"),
        }
        if i + 1 < count {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(accepted)
}

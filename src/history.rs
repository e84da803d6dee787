//! History providers: where the evaluator's feature population comes from.
//!
//! A snapshot is an owned copy taken at one instant. Samples appended after
//! the snapshot are invisible to the evaluation holding it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::telemetry::{FeatureVector, TelemetrySample};

#[async_trait::async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Prior feature vectors for `vehicle_id`, oldest first. May be empty.
    async fn snapshot(&self, vehicle_id: &str) -> Result<Vec<FeatureVector>>;
}

/// In-process history keyed by vehicle, optionally bounded per vehicle.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    inner: Arc<RwLock<HashMap<String, Vec<FeatureVector>>>>,
    capacity: Option<usize>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` most recent samples per vehicle.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: Some(capacity),
        }
    }

    pub async fn len(&self, vehicle_id: &str) -> usize {
        self.inner.read().await.get(vehicle_id).map_or(0, Vec::len)
    }

    /// Record an accepted sample so later snapshots include it.
    pub async fn append(&self, sample: &TelemetrySample) {
        let mut guard = self.inner.write().await;
        let entries = guard.entry(sample.vehicle_id.clone()).or_default();
        entries.push(sample.features());
        if let Some(cap) = self.capacity {
            if entries.len() > cap {
                let excess = entries.len() - cap;
                entries.drain(..excess);
            }
        }
    }
}

#[async_trait::async_trait]
impl HistoryProvider for MemoryHistory {
    async fn snapshot(&self, vehicle_id: &str) -> Result<Vec<FeatureVector>> {
        Ok(self.inner.read().await.get(vehicle_id).cloned().unwrap_or_default())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryEntry {
    Triple([f64; 3]),
    Features(FeatureVector),
}

/// Parse a JSON array of history entries, each either a
/// `[speed, fuel_level, temperature]` triple or an object with those keys.
pub fn parse_history_json(json: &str) -> Result<Vec<FeatureVector>> {
    let entries: Vec<HistoryEntry> = serde_json::from_str(json).context("history must be a JSON array")?;
    Ok(entries
        .into_iter()
        .map(|e| match e {
            HistoryEntry::Triple(t) => FeatureVector::from(t),
            HistoryEntry::Features(f) => f,
        })
        .collect())
}

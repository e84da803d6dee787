//! Telemetry data model -- raw ingestion records, validated samples, and
//! the feature projection consumed by the outlier model.

pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::validate::{validate, FuelPolicy, ValidationError};

/// Vehicle id used when a raw record does not name one.
pub const DEFAULT_VEHICLE: &str = "default";

/// A single field value as it arrives at the ingestion boundary.
///
/// Producers send either JSON numbers or numeric strings (`"72.5"`).
/// Anything else (booleans, arrays, objects) lands in `Other` so the
/// validator can reject it by field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Unvalidated telemetry record. Every field is optional so that a missing
/// field is reported by name instead of failing deserialization wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub speed: Option<FieldValue>,
    #[serde(default)]
    pub fuel_level: Option<FieldValue>,
    #[serde(default)]
    pub temperature: Option<FieldValue>,
    #[serde(default)]
    pub latitude: Option<FieldValue>,
    #[serde(default)]
    pub longitude: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawSample {
    /// Convenience constructor for numeric records (simulator, tests).
    pub fn from_values(speed: f64, fuel_level: f64, temperature: f64, latitude: f64, longitude: f64) -> Self {
        Self {
            vehicle_id: None,
            speed: Some(speed.into()),
            fuel_level: Some(fuel_level.into()),
            temperature: Some(temperature.into()),
            latitude: Some(latitude.into()),
            longitude: Some(longitude.into()),
            timestamp: None,
        }
    }

    pub fn with_vehicle(mut self, vehicle_id: impl Into<String>) -> Self {
        self.vehicle_id = Some(vehicle_id.into());
        self
    }

    /// The vehicle this record belongs to, falling back to [`DEFAULT_VEHICLE`]
    /// when absent or blank.
    pub fn vehicle_key(&self) -> String {
        match self.vehicle_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => DEFAULT_VEHICLE.to_string(),
        }
    }
}

/// A validated, immutable telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub vehicle_id: String,
    /// km/h
    pub speed: f64,
    /// percent, 0-100
    pub fuel_level: f64,
    /// degrees Celsius
    pub temperature: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn features(&self) -> FeatureVector {
        FeatureVector {
            speed: self.speed,
            fuel_level: self.fuel_level,
            temperature: self.temperature,
        }
    }
}

/// Projection of a sample onto the three dimensions the outlier model sees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub speed: f64,
    pub fuel_level: f64,
    pub temperature: f64,
}

impl FeatureVector {
    pub const DIMENSIONS: usize = 3;

    pub fn new(speed: f64, fuel_level: f64, temperature: f64) -> Self {
        Self { speed, fuel_level, temperature }
    }

    pub fn to_array(&self) -> [f64; Self::DIMENSIONS] {
        [self.speed, self.fuel_level, self.temperature]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl From<[f64; 3]> for FeatureVector {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

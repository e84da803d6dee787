//! Parse-and-validate step for raw telemetry records.
//!
//! Only structural checks live here: every numeric field must be present and
//! finite, and fuel must be a percentage. Extreme speeds or temperatures are
//! valid samples; flagging them is the rule engine's job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FieldValue, RawSample, TelemetrySample};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {field}")]
    Missing { field: &'static str },

    #[error("field {field} is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("field {field} is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("fuel_level {value} is outside 0-100")]
    FuelOutOfRange { value: f64 },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Missing { field }
            | ValidationError::NotANumber { field, .. }
            | ValidationError::NonFinite { field, .. } => field,
            ValidationError::FuelOutOfRange { .. } => "fuel_level",
        }
    }
}

/// What to do with a fuel reading outside [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelPolicy {
    /// Refuse the sample.
    #[default]
    Reject,
    /// Pin the reading to the nearest bound.
    Clamp,
}

/// Validate a raw record into a [`TelemetrySample`].
///
/// A missing `vehicle_id` falls back to [`super::DEFAULT_VEHICLE`]; a missing
/// timestamp is stamped with the current time.
pub fn validate(raw: &RawSample, fuel_policy: FuelPolicy) -> Result<TelemetrySample, ValidationError> {
    let speed = parse_field("speed", raw.speed.as_ref())?;
    let mut fuel_level = parse_field("fuel_level", raw.fuel_level.as_ref())?;
    let temperature = parse_field("temperature", raw.temperature.as_ref())?;
    let latitude = parse_field("latitude", raw.latitude.as_ref())?;
    let longitude = parse_field("longitude", raw.longitude.as_ref())?;

    if !(0.0..=100.0).contains(&fuel_level) {
        match fuel_policy {
            FuelPolicy::Reject => return Err(ValidationError::FuelOutOfRange { value: fuel_level }),
            FuelPolicy::Clamp => {
                tracing::debug!(fuel_level, "clamping fuel reading");
                fuel_level = fuel_level.clamp(0.0, 100.0);
            }
        }
    }

    Ok(TelemetrySample {
        vehicle_id: raw.vehicle_key(),
        speed,
        fuel_level,
        temperature,
        latitude,
        longitude,
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
    })
}

fn parse_field(field: &'static str, value: Option<&FieldValue>) -> Result<f64, ValidationError> {
    let v = match value {
        None => return Err(ValidationError::Missing { field }),
        Some(FieldValue::Number(n)) => *n,
        Some(FieldValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| ValidationError::NotANumber {
            field,
            value: s.clone(),
        })?,
        Some(FieldValue::Other(v)) => {
            return Err(ValidationError::NotANumber {
                field,
                value: v.to_string(),
            })
        }
    };
    if !v.is_finite() {
        return Err(ValidationError::NonFinite { field, value: v });
    }
    Ok(v)
}

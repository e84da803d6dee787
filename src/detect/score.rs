//! Health score and severity classification.
//!
//! The scorer's thresholds are deliberately not the rule thresholds: a
//! vehicle at 105 km/h loses health points without raising "Overspeed".

use super::Severity;

const SPEED_PENALTY_ABOVE_KMH: f64 = 100.0;
const HEAT_PENALTY_ABOVE_C: f64 = 85.0;
const FUEL_PENALTY_BELOW_PCT: f64 = 20.0;

const SPEED_PENALTY: i32 = 20;
const HEAT_PENALTY: i32 = 25;
const FUEL_PENALTY: i32 = 20;
const MODEL_PENALTY: i32 = 30;

pub const HEALTHY_MIN: u8 = 80;
pub const WARNING_MIN: u8 = 50;

/// Start at 100 and subtract a fixed penalty per condition. Never below 0.
pub fn score(speed: f64, temperature: f64, fuel_level: f64, model_triggered: bool) -> u8 {
    let mut health: i32 = 100;

    if speed > SPEED_PENALTY_ABOVE_KMH {
        health -= SPEED_PENALTY;
    }
    if temperature > HEAT_PENALTY_ABOVE_C {
        health -= HEAT_PENALTY;
    }
    if fuel_level < FUEL_PENALTY_BELOW_PCT {
        health -= FUEL_PENALTY;
    }
    if model_triggered {
        health -= MODEL_PENALTY;
    }

    health.clamp(0, 100) as u8
}

pub fn classify(health_score: u8) -> Severity {
    if health_score >= HEALTHY_MIN {
        Severity::Healthy
    } else if health_score >= WARNING_MIN {
        Severity::Warning
    } else {
        Severity::Critical
    }
}

//! Fixed threshold rules.

use crate::telemetry::TelemetrySample;

pub const OVERSPEED_KMH: f64 = 110.0;
pub const OVERHEAT_C: f64 = 85.0;
pub const LOW_FUEL_PCT: f64 = 15.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub triggered: bool,
    pub reasons: Vec<String>,
}

/// Run every rule against `sample`. Rules are independent; reasons come out
/// in the order Overspeed, Overheat, Low Fuel.
pub fn evaluate_rules(sample: &TelemetrySample) -> RuleOutcome {
    let checks: [(bool, &str); 3] = [
        (sample.speed > OVERSPEED_KMH, "Overspeed"),
        (sample.temperature > OVERHEAT_C, "Overheat"),
        (sample.fuel_level < LOW_FUEL_PCT, "Low Fuel"),
    ];

    let reasons: Vec<String> = checks
        .iter()
        .filter(|(fired, _)| *fired)
        .map(|(_, reason)| reason.to_string())
        .collect();

    RuleOutcome {
        triggered: !reasons.is_empty(),
        reasons,
    }
}

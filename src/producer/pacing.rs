//! Three-tier inter-iteration delay controller
//!
//! Above the target band the producer waits longer, below it shorter, and
//! inside it the default delay applies. There is no integral or derivative
//! term; the band only damps oscillation.

use serde::Serialize;
use std::time::Duration;

/// Target band and the delay used in each tier
#[derive(Debug, Clone, PartialEq)]
pub struct PacingSettings {
    pub target_min: f64,
    pub target_max: f64,
    pub delay_too_high: Duration,
    pub delay_in_band: Duration,
    pub delay_too_low: Duration,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            target_min: 10_000.0,
            target_max: 11_000.0,
            delay_too_high: Duration::from_millis(1_500),
            delay_in_band: Duration::from_millis(1_000),
            delay_too_low: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PacingDecision {
    /// Throughput above the band
    Throttle,
    /// Throughput inside the band, or not yet known
    Hold,
    /// Throughput below the band
    Accelerate,
}

#[derive(Debug, Clone)]
pub struct RateController {
    settings: PacingSettings,
}

impl RateController {
    pub fn new(settings: PacingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PacingSettings {
        &self.settings
    }

    /// Tier for a throughput reading; `None` holds at the default delay
    pub fn decide(&self, throughput: Option<f64>) -> PacingDecision {
        match throughput {
            Some(t) if t > self.settings.target_max => PacingDecision::Throttle,
            Some(t) if t < self.settings.target_min => PacingDecision::Accelerate,
            _ => PacingDecision::Hold,
        }
    }

    pub fn delay_for(&self, decision: PacingDecision) -> Duration {
        match decision {
            PacingDecision::Throttle => self.settings.delay_too_high,
            PacingDecision::Hold => self.settings.delay_in_band,
            PacingDecision::Accelerate => self.settings.delay_too_low,
        }
    }

    pub fn next_delay(&self, throughput: Option<f64>) -> (PacingDecision, Duration) {
        let decision = self.decide(throughput);
        (decision, self.delay_for(decision))
    }
}

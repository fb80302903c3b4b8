use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Phase;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseLimits {
    #[serde(alias = "lower")]
    pub lower_limit: f64,
    #[serde(alias = "upper")]
    pub upper_limit: f64,
}

impl PhaseLimits {
    pub fn new(lower_limit: f64, upper_limit: f64) -> Self {
        Self {
            lower_limit,
            upper_limit,
        }
    }

    /// Inclusive on both ends, as the backend judges.
    pub fn contains(&self, value: f64) -> bool {
        self.lower_limit <= value && value <= self.upper_limit
    }
}

/// Inspection model as the backend's model registry serves it: flat
/// per-phase limit columns. Read-only here; limits are judged by the
/// backend, the client only forwards the selected id and annotates readings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InspectionModel {
    pub id: i64,
    #[serde(alias = "name")]
    pub model_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub p1_lower_limit: f64,
    pub p1_upper_limit: f64,
    pub p2_lower_limit: f64,
    pub p2_upper_limit: f64,
    pub p3_lower_limit: f64,
    pub p3_upper_limit: f64,
}

fn default_active() -> bool {
    true
}

impl InspectionModel {
    pub fn limits_for(&self, phase: Phase) -> PhaseLimits {
        match phase {
            Phase::P1 => PhaseLimits::new(self.p1_lower_limit, self.p1_upper_limit),
            Phase::P2 => PhaseLimits::new(self.p2_lower_limit, self.p2_upper_limit),
            Phase::P3 => PhaseLimits::new(self.p3_lower_limit, self.p3_upper_limit),
        }
    }

    pub fn within_limits(&self, phase: Phase, value: f64) -> bool {
        self.limits_for(phase).contains(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementMethod {
    /// Fixed-interval sampling.
    #[default]
    Polling,
    /// Sample on every instrument refresh.
    Synchronized,
}

/// Timing profile for one model (or the global default when
/// `inspection_model_id` is empty). Durations are in seconds on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestSettings {
    pub name: String,
    #[serde(default)]
    pub inspection_model_id: Option<i64>,
    #[serde(default)]
    pub is_active: bool,
    pub p1_measure_duration: f64,
    pub wait_duration_1_to_2: f64,
    pub p2_measure_duration: f64,
    pub wait_duration_2_to_3: f64,
    pub p3_measure_duration: f64,
    #[serde(default)]
    pub measurement_method: MeasurementMethod,
    #[serde(default = "default_collection_interval")]
    pub data_collection_interval: f64,
}

fn default_collection_interval() -> f64 {
    0.1
}

impl TestSettings {
    pub fn measure_duration(&self, phase: Phase) -> Duration {
        let secs = match phase {
            Phase::P1 => self.p1_measure_duration,
            Phase::P2 => self.p2_measure_duration,
            Phase::P3 => self.p3_measure_duration,
        };
        secs_to_duration(secs)
    }

    /// Wait that follows `phase` before the next one starts.
    pub fn wait_after(&self, phase: Phase) -> Duration {
        match phase {
            Phase::P1 => secs_to_duration(self.wait_duration_1_to_2),
            Phase::P2 => secs_to_duration(self.wait_duration_2_to_3),
            Phase::P3 => Duration::ZERO,
        }
    }

    /// Offset from scan to the start of `phase` and the end of its
    /// measurement window.
    pub fn phase_window(&self, phase: Phase) -> (Duration, Duration) {
        let mut start = Duration::ZERO;
        for earlier in Phase::ALL.iter().take_while(|p| **p < phase) {
            start += self.measure_duration(*earlier) + self.wait_after(*earlier);
        }
        (start, start + self.measure_duration(phase))
    }

    pub fn expected_total(&self) -> Duration {
        self.phase_window(Phase::P3).1
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Measurement, MeasurementResult, Phase};

/// Value keyed by phase so several phase series share one time axis.
/// Exactly one slot is set per point.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseValues {
    pub p1: Option<f64>,
    pub p2: Option<f64>,
    pub p3: Option<f64>,
}

impl PhaseValues {
    pub fn single(phase: Phase, value: f64) -> Self {
        let mut values = Self::default();
        match phase {
            Phase::P1 => values.p1 = Some(value),
            Phase::P2 => values.p2 = Some(value),
            Phase::P3 => values.p3 = Some(value),
        }
        values
    }

    pub fn get(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::P1 => self.p1,
            Phase::P2 => self.p2,
            Phase::P3 => self.p3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub barcode: String,
    pub phase: Phase,
    pub values: PhaseValues,
    pub unit: String,
    pub result: MeasurementResult,
}

impl From<&Measurement> for ChartPoint {
    fn from(measurement: &Measurement) -> Self {
        Self {
            timestamp: measurement.timestamp,
            barcode: measurement.barcode.clone(),
            phase: measurement.phase,
            values: PhaseValues::single(measurement.phase, measurement.value),
            unit: measurement.unit.clone(),
            result: measurement.result,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub points: Vec<ChartPoint>,
    pub paused: bool,
    pub capacity: usize,
    /// History entries not on display (cleared from view or over capacity).
    pub hidden: usize,
}

//! Append-only measurement history for one listening window.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Measurement, MeasurementResult, Phase};

#[derive(Debug, Default)]
pub struct MeasurementAggregator {
    history: Vec<Measurement>,
    generation: u64,
}

/// Latest reading per phase for one barcode, with the overall verdict.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionSummary {
    pub barcode: String,
    pub phases: BTreeMap<Phase, Measurement>,
    pub overall: MeasurementResult,
}

impl MeasurementAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts every event, repeats included: the backend owns uniqueness.
    pub fn append(&mut self, measurement: Measurement) {
        self.history.push(measurement);
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.generation += 1;
    }

    pub fn history(&self) -> &[Measurement] {
        &self.history
    }

    pub fn current(&self) -> Option<&Measurement> {
        self.history.last()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Bumped by every [`clear`](Self::clear) so derived views notice resets.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn summary_for(&self, barcode: &str) -> Option<InspectionSummary> {
        let mut phases = BTreeMap::new();
        for measurement in self.history.iter().filter(|m| m.barcode == barcode) {
            phases.insert(measurement.phase, measurement.clone());
        }
        if phases.is_empty() {
            return None;
        }

        let overall = overall_result(&phases);
        Some(InspectionSummary {
            barcode: barcode.to_string(),
            phases,
            overall,
        })
    }
}

fn overall_result(phases: &BTreeMap<Phase, Measurement>) -> MeasurementResult {
    let results = || phases.values().map(|m| m.result);
    if results().any(|r| r == MeasurementResult::Error) {
        MeasurementResult::Error
    } else if results().any(|r| r == MeasurementResult::Fail) {
        MeasurementResult::Fail
    } else if phases.len() == Phase::ALL.len() && results().all(|r| r == MeasurementResult::Pass)
    {
        MeasurementResult::Pass
    } else {
        MeasurementResult::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(id: &str, barcode: &str, phase: Phase, result: MeasurementResult) -> Measurement {
        Measurement {
            measurement_id: id.into(),
            barcode: barcode.into(),
            phase,
            value: 1.0,
            unit: "V".into(),
            result,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn keeps_arrival_order_and_duplicates() {
        let mut aggregator = MeasurementAggregator::new();
        aggregator.append(reading("m-1", "BC1", Phase::P1, MeasurementResult::Pass));
        aggregator.append(reading("m-1", "BC1", Phase::P1, MeasurementResult::Pass));
        aggregator.append(reading("m-2", "BC1", Phase::P2, MeasurementResult::Pending));

        assert_eq!(aggregator.len(), 3);
        let ids: Vec<_> = aggregator
            .history()
            .iter()
            .map(|m| m.measurement_id.as_str())
            .collect();
        assert_eq!(ids, ["m-1", "m-1", "m-2"]);
        assert_eq!(aggregator.current().unwrap().phase, Phase::P2);
    }

    #[test]
    fn clear_empties_history_and_bumps_generation() {
        let mut aggregator = MeasurementAggregator::new();
        aggregator.append(reading("m-1", "BC1", Phase::P1, MeasurementResult::Fail));
        aggregator.clear();

        assert!(aggregator.is_empty());
        assert!(aggregator.current().is_none());
        assert_eq!(aggregator.generation(), 1);
    }

    #[test]
    fn summary_needs_all_phases_to_pass() {
        let mut aggregator = MeasurementAggregator::new();
        aggregator.append(reading("m-1", "BC1", Phase::P1, MeasurementResult::Pass));
        aggregator.append(reading("m-2", "BC1", Phase::P2, MeasurementResult::Pass));
        assert_eq!(
            aggregator.summary_for("BC1").unwrap().overall,
            MeasurementResult::Pending
        );

        aggregator.append(reading("m-3", "BC1", Phase::P3, MeasurementResult::Pass));
        assert_eq!(
            aggregator.summary_for("BC1").unwrap().overall,
            MeasurementResult::Pass
        );
        assert!(aggregator.summary_for("BC2").is_none());
    }

    #[test]
    fn any_failed_phase_fails_the_barcode() {
        let mut aggregator = MeasurementAggregator::new();
        aggregator.append(reading("m-1", "BC1", Phase::P1, MeasurementResult::Fail));
        aggregator.append(reading("m-2", "BC1", Phase::P2, MeasurementResult::Pass));

        let summary = aggregator.summary_for("BC1").unwrap();
        assert_eq!(summary.overall, MeasurementResult::Fail);
        assert_eq!(summary.phases.len(), 2);
    }
}

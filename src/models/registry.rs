use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{InspectionModel, Measurement, TestSettings};

/// Local copy of the backend's model and timing tables, as exported from
/// its registry endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelRegistry {
    #[serde(default)]
    pub inspection_models: Vec<InspectionModel>,
    #[serde(default)]
    pub test_settings: Vec<TestSettings>,
}

impl ModelRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model registry from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid model registry in {}", path.display()))
    }

    pub fn model(&self, id: i64) -> Option<&InspectionModel> {
        self.inspection_models.iter().find(|model| model.id == id)
    }

    /// Timing for `model_id`: its own active profile, else the active global
    /// one.
    pub fn timing_for(&self, model_id: Option<i64>) -> Option<&TestSettings> {
        let active = |settings: &&TestSettings| settings.is_active;
        model_id
            .and_then(|id| {
                self.test_settings
                    .iter()
                    .filter(active)
                    .find(|settings| settings.inspection_model_id == Some(id))
            })
            .or_else(|| {
                self.test_settings
                    .iter()
                    .filter(active)
                    .find(|settings| settings.inspection_model_id.is_none())
            })
    }

    /// Whether `measurement` lies within the selected model's limits for its
    /// phase. `None` when the model is unknown.
    pub fn within_limits(&self, model_id: Option<i64>, measurement: &Measurement) -> Option<bool> {
        let model = self.model(model_id?)?;
        Some(model.within_limits(measurement.phase, measurement.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementResult, Phase};
    use chrono::Utc;
    use std::{env, time::Duration};
    use uuid::Uuid;

    const REGISTRY: &str = r#"{
        "inspection_models": [
            {"id": 7, "model_name": "PSU-220", "p1_lower_limit": 10.0, "p1_upper_limit": 14.0,
             "p2_lower_limit": 11.0, "p2_upper_limit": 13.0, "p3_lower_limit": 0.0, "p3_upper_limit": 1.5},
            {"id": 8, "model_name": "PSU-110", "is_active": false, "p1_lower_limit": 5.0, "p1_upper_limit": 7.0,
             "p2_lower_limit": 5.0, "p2_upper_limit": 7.0, "p3_lower_limit": 0.0, "p3_upper_limit": 1.0}
        ],
        "test_settings": [
            {"name": "global", "is_active": true, "p1_measure_duration": 5.0, "wait_duration_1_to_2": 2.0,
             "p2_measure_duration": 3.0, "wait_duration_2_to_3": 1.0, "p3_measure_duration": 4.0},
            {"name": "psu-220", "is_active": true, "inspection_model_id": 7, "p1_measure_duration": 1.0,
             "wait_duration_1_to_2": 1.0, "p2_measure_duration": 1.0, "wait_duration_2_to_3": 1.0, "p3_measure_duration": 1.0},
            {"name": "psu-110 old", "is_active": false, "inspection_model_id": 8, "p1_measure_duration": 9.0,
             "wait_duration_1_to_2": 9.0, "p2_measure_duration": 9.0, "wait_duration_2_to_3": 9.0, "p3_measure_duration": 9.0}
        ]
    }"#;

    fn reading(phase: Phase, value: f64) -> Measurement {
        Measurement {
            measurement_id: "m-1".into(),
            barcode: "BC1".into(),
            phase,
            value,
            unit: "V".into(),
            result: MeasurementResult::Pass,
            timestamp: Utc::now(),
        }
    }

    fn registry() -> ModelRegistry {
        serde_json::from_str(REGISTRY).unwrap()
    }

    #[test]
    fn judges_readings_against_the_selected_model() {
        let registry = registry();
        assert_eq!(registry.within_limits(Some(7), &reading(Phase::P1, 12.3)), Some(true));
        assert_eq!(registry.within_limits(Some(7), &reading(Phase::P3, 2.0)), Some(false));
        assert_eq!(registry.within_limits(Some(99), &reading(Phase::P1, 12.3)), None);
        assert_eq!(registry.within_limits(None, &reading(Phase::P1, 12.3)), None);
        assert!(!registry.model(8).unwrap().is_active);
    }

    #[test]
    fn timing_prefers_active_model_profile_then_global() {
        let registry = registry();
        assert_eq!(registry.timing_for(Some(7)).unwrap().name, "psu-220");
        assert_eq!(registry.timing_for(Some(8)).unwrap().name, "global");
        assert_eq!(
            registry.timing_for(None).unwrap().expected_total(),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn loads_from_file_and_reports_bad_content() {
        let path = env::temp_dir().join(format!("inspect-live-models-{}.json", Uuid::new_v4()));
        fs::write(&path, REGISTRY).unwrap();
        assert_eq!(ModelRegistry::load(&path).unwrap(), registry());

        fs::write(&path, "{ \"inspection_models\": 7 }").unwrap();
        assert!(ModelRegistry::load(&path).is_err());
        let _ = fs::remove_file(&path);

        assert!(ModelRegistry::load(&path).is_err());
    }
}

mod inspection_model;
mod measurement;
mod registry;

pub use inspection_model::{InspectionModel, MeasurementMethod, PhaseLimits, TestSettings};
pub use measurement::{parse_timestamp, Measurement, MeasurementResult, Phase};
pub use registry::ModelRegistry;

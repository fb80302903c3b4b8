use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered measurement stage of one inspection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    P1,
    P2,
    P3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::P1, Phase::P2, Phase::P3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::P1 => "P1",
            Phase::P2 => "P2",
            Phase::P3 => "P3",
        }
    }

    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::P1 => Some(Phase::P2),
            Phase::P2 => Some(Phase::P3),
            Phase::P3 => None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeasurementResult {
    Pass,
    Fail,
    Pending,
    /// The backend could not judge the phase (instrument fault, no samples).
    Error,
}

impl MeasurementResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementResult::Pass => "PASS",
            MeasurementResult::Fail => "FAIL",
            MeasurementResult::Pending => "PENDING",
            MeasurementResult::Error => "ERROR",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, MeasurementResult::Pending)
    }
}

impl fmt::Display for MeasurementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reading streamed by the backend. Never edited after it is received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(deserialize_with = "opaque_id")]
    pub measurement_id: String,
    pub barcode: String,
    pub phase: Phase,
    pub value: f64,
    pub unit: String,
    pub result: MeasurementResult,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Server ids are opaque: the backend sends database integers, older builds
/// sent strings. Both are kept as text.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "measurementId must be a string or number, got {other}"
        ))),
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

/// Accepts RFC 3339 and the zone-less ISO 8601 form the backend's
/// `isoformat()` produces; zone-less values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

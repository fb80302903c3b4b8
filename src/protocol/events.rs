use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{parse_timestamp, Measurement, MeasurementResult, Phase, PhaseLimits};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not a JSON envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown event type '{0}'")]
    UnknownKind(String),
    #[error("invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("binary frames are not part of the protocol ({0} bytes)")]
    Binary(usize),
}

/// Device counts and progress of the running inspection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, alias = "connected_devices")]
    pub connected_device_count: u32,
    #[serde(default, alias = "total_devices")]
    pub total_device_count: u32,
    #[serde(default)]
    pub current_phase: Option<Phase>,
    #[serde(default)]
    pub progress_percent: Option<i64>,
    #[serde(default)]
    pub current_barcode: Option<String>,
}

/// Ack of `start_listening`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStarted {
    #[serde(default, alias = "connected_devices")]
    pub connected_device_count: u32,
    #[serde(default, alias = "total_devices")]
    pub total_device_count: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStarted {
    pub phase: Phase,
    /// Planned measuring time in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub limits: Option<PhaseLimits>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitingBetweenPhases {
    #[serde(alias = "from_phase")]
    pub from_phase: Phase,
    #[serde(alias = "to_phase")]
    pub to_phase: Phase,
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitingCountdown {
    #[serde(alias = "remaining_seconds")]
    pub remaining_seconds: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionCompleted {
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(alias = "overall_result")]
    pub overall_result: MeasurementResult,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionFault {
    #[serde(alias = "error")]
    pub message: String,
    #[serde(default)]
    pub barcode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BarcodeScanned {
    pub barcode: String,
}

/// Inbound event after envelope decoding and payload validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Status(StatusUpdate),
    Measurement(Measurement),
    ListeningStarted(ListeningStarted),
    ListeningStopped,
    PhaseStarted(PhaseStarted),
    WaitingBetweenPhases(WaitingBetweenPhases),
    WaitingCountdown(WaitingCountdown),
    InspectionCompleted(InspectionCompleted),
    InspectionError(InspectionFault),
    InspectionStopped,
    BarcodeScanned(BarcodeScanned),
    Heartbeat,
    ConnectionStatus,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Status(_) => "status",
            ServerEvent::Measurement(_) => "measurement",
            ServerEvent::ListeningStarted(_) => "listening_started",
            ServerEvent::ListeningStopped => "listening_stopped",
            ServerEvent::PhaseStarted(_) => "phase_started",
            ServerEvent::WaitingBetweenPhases(_) => "waiting_between_phases",
            ServerEvent::WaitingCountdown(_) => "waiting_countdown",
            ServerEvent::InspectionCompleted(_) => "inspection_completed",
            ServerEvent::InspectionError(_) => "inspection_error",
            ServerEvent::InspectionStopped => "inspection_stopped",
            ServerEvent::BarcodeScanned(_) => "barcode_scanned",
            ServerEvent::Heartbeat => "heartbeat",
            ServerEvent::ConnectionStatus => "connection_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub event: ServerEvent,
    /// Server send time, when the envelope carries a readable one.
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<String>,
    /// Top-level keys of frames that carry their payload inline.
    #[serde(flatten)]
    inline: Map<String, Value>,
}

impl Envelope {
    /// The payload: `data` when present, else the envelope's own keys for
    /// kinds the backend broadcasts without a `data` wrapper.
    fn body(self) -> Value {
        let inline_kind = matches!(
            self.kind.as_str(),
            "phase_started"
                | "waiting_between_phases"
                | "waiting_countdown"
                | "inspection_completed"
                | "inspection_error"
                | "barcode_scanned"
        );
        if self.data.is_null() && inline_kind {
            Value::Object(self.inline)
        } else {
            self.data
        }
    }
}

/// Unwraps `{"<key>": {...}}` to its inner object; anything else is returned
/// unchanged.
fn unwrap_object(body: Value, key: &str) -> Value {
    match body {
        Value::Object(mut map) if map.get(key).is_some_and(Value::is_object) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Decodes one text frame. Nothing here panics on hostile input; every
/// failure comes back as a [`ProtocolError`] for the caller to log and drop.
pub fn parse_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let sent_at = envelope.timestamp.as_deref().and_then(parse_timestamp);
    let kind = envelope.kind.clone();
    let body = envelope.body();
    let kind = kind.as_str();

    let event = match kind {
        "status" | "inspection_status" => {
            let status: StatusUpdate = payload(kind, body)?;
            if let Some(progress) = status.progress_percent {
                if !(0..=100).contains(&progress) {
                    return Err(ProtocolError::OutOfRange {
                        field: "progressPercent",
                        value: progress,
                    });
                }
            }
            ServerEvent::Status(status)
        }
        "measurement" | "measurement_data" => ServerEvent::Measurement(payload(kind, body)?),
        "listening_started" => ServerEvent::ListeningStarted(if body.is_null() {
            ListeningStarted::default()
        } else {
            payload(kind, body)?
        }),
        "listening_stopped" => ServerEvent::ListeningStopped,
        "phase_started" => ServerEvent::PhaseStarted(payload(kind, body)?),
        "waiting_between_phases" => ServerEvent::WaitingBetweenPhases(payload(kind, body)?),
        "waiting_countdown" => ServerEvent::WaitingCountdown(payload(kind, body)?),
        "inspection_completed" => {
            ServerEvent::InspectionCompleted(payload(kind, unwrap_object(body, "results"))?)
        }
        "inspection_error" => {
            ServerEvent::InspectionError(payload(kind, unwrap_object(body, "error_info"))?)
        }
        "inspection_stopped" => ServerEvent::InspectionStopped,
        "barcode_scanned" => ServerEvent::BarcodeScanned(payload(kind, body)?),
        "heartbeat" => ServerEvent::Heartbeat,
        "connection_status" => ServerEvent::ConnectionStatus,
        other => return Err(ProtocolError::UnknownKind(other.to_string())),
    };

    Ok(InboundFrame { event, sent_at })
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_with_optional_fields() {
        let frame = parse_frame(
            r#"{"type":"status","data":{"connectedDeviceCount":2,"totalDeviceCount":3,"currentPhase":"P2","progressPercent":40},"timestamp":"2024-05-01T09:30:00Z"}"#,
        )
        .unwrap();

        let ServerEvent::Status(status) = frame.event else {
            panic!("expected status event");
        };
        assert_eq!(status.connected_device_count, 2);
        assert_eq!(status.total_device_count, 3);
        assert_eq!(status.current_phase, Some(Phase::P2));
        assert_eq!(status.progress_percent, Some(40));
        assert!(status.current_barcode.is_none());
        assert!(frame.sent_at.is_some());
    }

    #[test]
    fn accepts_backend_inspection_status_keys() {
        let frame = parse_frame(
            r#"{"type":"inspection_status","data":{"is_listening":false,"connected_devices":1,"total_devices":4},"timestamp":"2024-05-01T09:30:00.123456"}"#,
        )
        .unwrap();

        assert_eq!(
            frame.event,
            ServerEvent::Status(StatusUpdate {
                connected_device_count: 1,
                total_device_count: 4,
                current_phase: None,
                progress_percent: None,
                current_barcode: None,
            })
        );
        assert!(frame.sent_at.is_some());
    }

    #[test]
    fn parses_measurement() {
        let frame = parse_frame(
            r#"{"type":"measurement","data":{"measurementId":"m-1","barcode":"BC123","phase":"P1","value":12.3,"unit":"V","result":"PASS","timestamp":"2024-05-01T09:30:01Z"}}"#,
        )
        .unwrap();

        let ServerEvent::Measurement(measurement) = frame.event else {
            panic!("expected measurement event");
        };
        assert_eq!(measurement.barcode, "BC123");
        assert_eq!(measurement.value, 12.3);
        assert!(frame.sent_at.is_none());
    }

    #[test]
    fn rejects_progress_outside_percent_range() {
        let err = parse_frame(r#"{"type":"status","data":{"progressPercent":140}}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OutOfRange {
                field: "progressPercent",
                value: 140
            }
        ));
    }

    #[test]
    fn rejects_garbage_unknown_kinds_and_bad_payloads() {
        assert!(matches!(
            parse_frame("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"reboot","data":{}}"#),
            Err(ProtocolError::UnknownKind(kind)) if kind == "reboot"
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"measurement","data":{"barcode":"BC1"}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn payloadless_kinds_ignore_missing_data() {
        assert_eq!(
            parse_frame(r#"{"type":"heartbeat"}"#).unwrap().event,
            ServerEvent::Heartbeat
        );
        assert_eq!(
            parse_frame(r#"{"type":"listening_started"}"#).unwrap().event,
            ServerEvent::ListeningStarted(ListeningStarted::default())
        );
    }

    #[test]
    fn inspection_error_accepts_backend_error_key() {
        let frame =
            parse_frame(r#"{"type":"inspection_error","data":{"error":"meter timeout"}}"#).unwrap();
        assert_eq!(
            frame.event,
            ServerEvent::InspectionError(InspectionFault {
                message: "meter timeout".into(),
                barcode: None,
            })
        );
    }

    #[test]
    fn decodes_inline_phase_progress_frames() {
        let frame = parse_frame(
            r#"{"type":"phase_started","session_id":"s-1","phase":"P2","duration":5.0,"limits":{"lower":11.0,"upper":13.0},"timestamp":"2024-05-01T09:30:00.125"}"#,
        )
        .unwrap();
        assert_eq!(
            frame.event,
            ServerEvent::PhaseStarted(PhaseStarted {
                phase: Phase::P2,
                duration: Some(5.0),
                limits: Some(PhaseLimits::new(11.0, 13.0)),
            })
        );
        assert!(frame.sent_at.is_some());

        let frame = parse_frame(
            r#"{"type":"waiting_between_phases","session_id":"s-1","from_phase":"P1","to_phase":"P2","duration":2.0,"timestamp":"2024-05-01T09:30:05"}"#,
        )
        .unwrap();
        assert_eq!(
            frame.event,
            ServerEvent::WaitingBetweenPhases(WaitingBetweenPhases {
                from_phase: Phase::P1,
                to_phase: Phase::P2,
                duration: 2.0,
            })
        );

        let frame = parse_frame(
            r#"{"type":"waiting_countdown","session_id":"s-1","remaining_seconds":1.5,"timestamp":"2024-05-01T09:30:05.500"}"#,
        )
        .unwrap();
        assert_eq!(
            frame.event,
            ServerEvent::WaitingCountdown(WaitingCountdown {
                remaining_seconds: 1.5
            })
        );
    }

    #[test]
    fn decodes_wrapped_completion_and_error_frames() {
        let frame = parse_frame(
            r#"{"type":"inspection_completed","results":{"session_id":"s-1","barcode":"BC123","overall_result":"FAIL","start_time":"2024-05-01T09:30:00","end_time":"2024-05-01T09:30:20","total_duration":20.0,"phases":{}},"timestamp":"2024-05-01T09:30:20"}"#,
        )
        .unwrap();
        assert_eq!(
            frame.event,
            ServerEvent::InspectionCompleted(InspectionCompleted {
                barcode: Some("BC123".into()),
                overall_result: MeasurementResult::Fail,
            })
        );

        let frame = parse_frame(
            r#"{"type":"inspection_error","error_info":{"session_id":null,"error":"meter timeout","timestamp":"2024-05-01T09:30:20"},"timestamp":"2024-05-01T09:30:20"}"#,
        )
        .unwrap();
        assert_eq!(
            frame.event,
            ServerEvent::InspectionError(InspectionFault {
                message: "meter timeout".into(),
                barcode: None,
            })
        );

        let frame = parse_frame(
            r#"{"type":"inspection_stopped","session_id":null,"timestamp":"2024-05-01T09:30:20"}"#,
        )
        .unwrap();
        assert_eq!(frame.event, ServerEvent::InspectionStopped);
    }

    #[test]
    fn status_without_data_is_dropped() {
        // Top-level keys never stand in for a status payload: a defaulted
        // status would zero the device counts.
        let err = parse_frame(
            r#"{"type":"inspection_status","status":"idle","message":"Ready for barcode scan","timestamp":"2024-05-01T09:30:00"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { kind, .. } if kind == "inspection_status"));
    }
}

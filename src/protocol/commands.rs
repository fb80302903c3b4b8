use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Operator command as it goes on the wire.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    StartListening(StartListening),
    SubmitBarcode(SubmitBarcode),
    StopListening(StopListening),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartListening {
    pub model_id: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBarcode {
    pub barcode: String,
    pub model_id: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct StopListening {}

impl Command {
    pub fn start_listening(model_id: i64) -> Self {
        Command::StartListening(StartListening { model_id })
    }

    pub fn submit_barcode(barcode: impl Into<String>, model_id: i64) -> Self {
        Command::SubmitBarcode(SubmitBarcode {
            barcode: barcode.into(),
            model_id,
        })
    }

    pub fn stop_listening() -> Self {
        Command::StopListening(StopListening {})
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::StartListening(_) => "start_listening",
            Command::SubmitBarcode(_) => "submit_barcode",
            Command::StopListening(_) => "stop_listening",
        }
    }

    /// Serializes the command into a text frame tagged with `request_id`.
    pub fn encode(&self, request_id: Uuid) -> Result<String, serde_json::Error> {
        let mut frame = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut frame {
            map.insert("requestId".into(), Value::String(request_id.to_string()));
        }
        serde_json::to_string(&frame)
    }
}

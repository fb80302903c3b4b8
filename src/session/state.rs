use serde::{Deserialize, Serialize};

use crate::{
    models::{MeasurementResult, Phase},
    protocol::{ListeningStarted, StatusUpdate},
};

/// Where the operator is in the inspection flow. Derived from
/// [`InspectionSession`], never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStage {
    Idle,
    Listening,
    AwaitingPhase1,
    AwaitingPhase2,
    AwaitingPhase3,
    Settled,
    /// Connection is down; the fields underneath are frozen.
    ConnectionLost,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettledInspection {
    pub barcode: String,
    pub result: MeasurementResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionSession {
    pub is_listening: bool,
    pub connected_device_count: u32,
    pub total_device_count: u32,
    pub current_barcode: Option<String>,
    pub current_phase: Option<Phase>,
    pub progress_percent: Option<u8>,
    /// Seconds left in the wait between two phases.
    pub wait_remaining_secs: Option<f64>,
    pub last_settled: Option<SettledInspection>,
    pub last_error: Option<String>,
    pub connection_lost: bool,
}

impl InspectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> SessionStage {
        if self.connection_lost {
            return SessionStage::ConnectionLost;
        }
        if !self.is_listening {
            return SessionStage::Idle;
        }
        match (&self.current_barcode, self.current_phase) {
            (Some(_), None | Some(Phase::P1)) => SessionStage::AwaitingPhase1,
            (Some(_), Some(Phase::P2)) => SessionStage::AwaitingPhase2,
            (Some(_), Some(Phase::P3)) => SessionStage::AwaitingPhase3,
            (None, _) if self.last_settled.is_some() => SessionStage::Settled,
            (None, _) => SessionStage::Listening,
        }
    }

    /// Start ack: a fresh listening window.
    pub fn begin_listening(&mut self, ack: &ListeningStarted) {
        *self = Self {
            is_listening: true,
            connected_device_count: ack.connected_device_count,
            total_device_count: ack.total_device_count,
            ..Self::default()
        };
    }

    /// Stop ack, or a backend session that cannot be trusted any more.
    pub fn end_listening(&mut self) {
        self.is_listening = false;
        self.clear_inspection();
    }

    /// Last write wins. Barcode and phase only apply inside a listening
    /// window, and only while a barcode is being inspected.
    pub fn apply_status(&mut self, status: &StatusUpdate) {
        self.connected_device_count = status.connected_device_count;
        self.total_device_count = status.total_device_count;
        if self.is_trailing_status(status) {
            return;
        }

        if self.is_listening {
            if let Some(barcode) = &status.current_barcode {
                self.track_barcode(barcode);
            }
            if self.current_barcode.is_some() {
                self.current_phase = status.current_phase;
            }
        }
        self.progress_percent = status
            .progress_percent
            .and_then(|progress| u8::try_from(progress).ok());
    }

    /// Status still describing the inspection that just settled.
    fn is_trailing_status(&self, status: &StatusUpdate) -> bool {
        match (&self.last_settled, &status.current_barcode) {
            (Some(settled), Some(barcode)) => {
                self.current_barcode.is_none() && settled.barcode == *barcode
            }
            _ => false,
        }
    }

    /// Points the session at `barcode`. A new barcode starts over at P1.
    pub fn track_barcode(&mut self, barcode: &str) {
        if !self.is_listening || self.current_barcode.as_deref() == Some(barcode) {
            return;
        }
        self.current_barcode = Some(barcode.to_string());
        self.current_phase = None;
        self.progress_percent = None;
        self.wait_remaining_secs = None;
        self.last_settled = None;
    }

    pub fn enter_phase(&mut self, phase: Phase) {
        if !self.is_listening {
            return;
        }
        self.current_phase = Some(phase);
        self.wait_remaining_secs = None;
    }

    pub fn settle(&mut self, barcode: String, result: MeasurementResult) {
        self.last_settled = Some(SettledInspection { barcode, result });
        self.clear_inspection();
    }

    pub fn clear_inspection(&mut self) {
        self.current_barcode = None;
        self.current_phase = None;
        self.progress_percent = None;
        self.wait_remaining_secs = None;
    }
}

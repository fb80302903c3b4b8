//! Wire protocol spoken with the inspection backend.
//!
//! Every frame is a JSON text message of the shape
//! `{"type": "<kind>", "data": {...}, "timestamp": "..."}`, in both
//! directions. Outbound frames also carry a client-generated `requestId`.

mod commands;
mod events;

pub use commands::{Command, StartListening, StopListening, SubmitBarcode};
pub use events::{
    parse_frame, BarcodeScanned, InboundFrame, InspectionCompleted, InspectionFault,
    ListeningStarted, PhaseStarted, ProtocolError, ServerEvent, StatusUpdate,
    WaitingBetweenPhases, WaitingCountdown,
};

mod controller;
mod error;
mod state;

pub use controller::{ControllerOptions, SessionController, DEFAULT_ACK_TIMEOUT};
pub use error::SessionError;
pub use state::{InspectionSession, SessionStage, SettledInspection};

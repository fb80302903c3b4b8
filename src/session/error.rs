use thiserror::Error;

/// Errors returned synchronously to the caller of an operator command.
///
/// Transport and protocol failures never show up here: they are retried or
/// dropped inside the event loop and surface only as state changes.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to the inspection backend")]
    NotConnected,
    #[error("not listening for barcodes; start listening first")]
    NotListening,
    #[error("no inspection model selected")]
    InvalidModel,
    #[error("barcode is empty")]
    InvalidBarcode,
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("link closed before the command was handed over")]
    LinkClosed,
    #[error("inspection client is no longer running")]
    RuntimeClosed,
}

impl SessionError {
    /// Rejected before any network I/O.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SessionError::NotConnected
                | SessionError::NotListening
                | SessionError::InvalidModel
                | SessionError::InvalidBarcode
        )
    }
}

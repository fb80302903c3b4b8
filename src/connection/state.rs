use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl ConnectionState {
    pub fn is_up(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Connecting or connected: a new attempt would be redundant.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Why a link went away. Drives the reconnect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Operator `disconnect()` or an orderly close from the server.
    Manual,
    /// Closed with a non-normal code or without a close frame.
    Abnormal,
    /// Transport failure: handshake, I/O, protocol violation.
    Error,
}

impl CloseReason {
    pub fn from_close_code(code: Option<u16>) -> Self {
        match code {
            Some(NORMAL_CLOSURE) => CloseReason::Manual,
            _ => CloseReason::Abnormal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Deliberate close: stay disconnected.
    Stay,
    Retry(Duration),
    /// Retry budget exhausted.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Applied to `base_delay` after transport errors.
    pub error_multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(3000),
            error_multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// `retries` is the number of reconnects already scheduled since the
    /// last successful open.
    pub fn decide(&self, retries: u32, reason: CloseReason) -> RetryDecision {
        match reason {
            CloseReason::Manual => RetryDecision::Stay,
            _ if retries >= self.max_retries => RetryDecision::GiveUp,
            CloseReason::Abnormal => RetryDecision::Retry(self.base_delay),
            CloseReason::Error => {
                RetryDecision::Retry(self.base_delay.saturating_mul(self.error_multiplier))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_close_code_is_not_retried() {
        let policy = ReconnectPolicy::default();
        let reason = CloseReason::from_close_code(Some(NORMAL_CLOSURE));
        assert_eq!(policy.decide(0, reason), RetryDecision::Stay);
    }

    #[test]
    fn abnormal_close_uses_base_delay_until_budget_runs_out() {
        let policy = ReconnectPolicy::default();
        for retries in 0..5 {
            assert_eq!(
                policy.decide(retries, CloseReason::from_close_code(Some(1006))),
                RetryDecision::Retry(Duration::from_millis(3000))
            );
        }
        assert_eq!(policy.decide(5, CloseReason::Abnormal), RetryDecision::GiveUp);
    }

    #[test]
    fn transport_error_doubles_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.decide(2, CloseReason::Error),
            RetryDecision::Retry(Duration::from_millis(6000))
        );
        assert_eq!(policy.decide(5, CloseReason::Error), RetryDecision::GiveUp);
    }

    #[test]
    fn missing_close_frame_counts_as_abnormal() {
        assert_eq!(CloseReason::from_close_code(None), CloseReason::Abnormal);
    }
}

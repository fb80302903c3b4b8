use std::time::Duration;

use tokio::{sync::watch, time::Instant};
use uuid::Uuid;

use crate::{
    connection::{ConnectionManager, ConnectionState, LinkNotice},
    feed::{FeedSnapshot, WindowedFeed, DEFAULT_MAX_POINTS},
    history::{InspectionSummary, MeasurementAggregator},
    models::{Measurement, MeasurementResult},
    protocol::{Command, ServerEvent},
};

use super::{InspectionSession, SessionError};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// How long a start/stop command may go unacknowledged.
    pub ack_timeout: Duration,
    pub feed_max_points: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            feed_max_points: DEFAULT_MAX_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    Start,
    Stop,
}

impl AckKind {
    fn command(&self) -> &'static str {
        match self {
            AckKind::Start => "start_listening",
            AckKind::Stop => "stop_listening",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingAck {
    kind: AckKind,
    request_id: Uuid,
    deadline: Instant,
}

/// The session state machine and the single dispatcher for everything that
/// happens on the event loop: operator commands, link notices, timers.
///
/// Inbound events flow connection -> session -> history -> feed; state is
/// published to subscribers after every step.
pub struct SessionController {
    connection: ConnectionManager,
    session: InspectionSession,
    history: MeasurementAggregator,
    feed: WindowedFeed,
    options: ControllerOptions,
    pending: Option<PendingAck>,
    last_connection: ConnectionState,
    ever_connected: bool,
    session_tx: watch::Sender<InspectionSession>,
    feed_tx: watch::Sender<FeedSnapshot>,
    latest_tx: watch::Sender<Option<Measurement>>,
}

impl SessionController {
    pub fn new(connection: ConnectionManager, options: ControllerOptions) -> Self {
        let feed = WindowedFeed::new(options.feed_max_points);
        let last_connection = connection.state();
        Self {
            connection,
            session: InspectionSession::new(),
            history: MeasurementAggregator::new(),
            session_tx: watch::channel(InspectionSession::new()).0,
            feed_tx: watch::channel(feed.snapshot()).0,
            latest_tx: watch::channel(None).0,
            feed,
            options,
            pending: None,
            last_connection,
            ever_connected: false,
        }
    }

    pub fn session(&self) -> &InspectionSession {
        &self.session
    }

    pub fn history(&self) -> &[Measurement] {
        self.history.history()
    }

    pub fn current_measurement(&self) -> Option<&Measurement> {
        self.history.current()
    }

    pub fn summary_for(&self, barcode: &str) -> Option<InspectionSummary> {
        self.history.summary_for(barcode)
    }

    pub fn feed(&self) -> &WindowedFeed {
        &self.feed
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<InspectionSession> {
        self.session_tx.subscribe()
    }

    pub fn subscribe_feed(&self) -> watch::Receiver<FeedSnapshot> {
        self.feed_tx.subscribe()
    }

    pub fn subscribe_latest(&self) -> watch::Receiver<Option<Measurement>> {
        self.latest_tx.subscribe()
    }

    // ---- connection lifecycle ---------------------------------------------

    pub fn connect(&mut self) {
        self.connection.connect();
        self.sync_connection();
    }

    pub fn retry_now(&mut self) {
        self.connection.retry_now();
        self.sync_connection();
    }

    pub fn disconnect(&mut self) {
        self.pending = None;
        self.connection.disconnect();
        self.sync_connection();
    }

    // ---- operator commands --------------------------------------------------

    /// Asks the backend to open a listening window. `is_listening` only flips
    /// once the ack arrives.
    pub fn start_listening(&mut self, model_id: Option<i64>) -> Result<Uuid, SessionError> {
        let model_id = model_id.ok_or(SessionError::InvalidModel)?;
        let request_id = self.connection.send(&Command::start_listening(model_id))?;
        self.arm_ack(AckKind::Start, request_id);
        log_info!("start_listening sent for model {model_id}");
        Ok(request_id)
    }

    /// Sends a scan. Phase and result advance only from inbound events.
    pub fn submit_barcode(
        &mut self,
        barcode: &str,
        model_id: Option<i64>,
    ) -> Result<Uuid, SessionError> {
        if !self.session.is_listening {
            return Err(SessionError::NotListening);
        }
        let barcode = barcode.trim();
        if barcode.is_empty() {
            return Err(SessionError::InvalidBarcode);
        }
        let model_id = model_id.ok_or(SessionError::InvalidModel)?;

        let request_id = self
            .connection
            .send(&Command::submit_barcode(barcode, model_id))?;
        self.session.track_barcode(barcode);
        self.publish_session();
        log_info!("barcode {barcode} submitted");
        Ok(request_id)
    }

    /// Closes the listening window. A no-op when not listening.
    pub fn stop(&mut self) -> Result<Option<Uuid>, SessionError> {
        if !self.session.is_listening {
            return Ok(None);
        }
        let request_id = self.connection.send(&Command::stop_listening())?;
        self.arm_ack(AckKind::Stop, request_id);
        Ok(Some(request_id))
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.publish_history();
    }

    pub fn pause_feed(&mut self) {
        self.feed.pause();
        self.publish_feed();
    }

    pub fn resume_feed(&mut self) {
        self.feed.resume(&self.history);
        self.publish_feed();
    }

    pub fn clear_feed(&mut self) {
        self.feed.clear(&self.history);
        self.publish_feed();
    }

    // ---- inbound ------------------------------------------------------------

    pub fn handle_notice(&mut self, notice: LinkNotice) {
        if let Some(event) = self.connection.handle(notice) {
            self.apply(event);
        }
        self.sync_connection();
    }

    /// Applies one decoded server event.
    pub fn apply(&mut self, event: ServerEvent) {
        log_debug!("inbound {}", event.kind());
        match event {
            ServerEvent::Measurement(measurement) => self.record_measurement(measurement),
            ServerEvent::Status(status) => self.session.apply_status(&status),
            ServerEvent::ListeningStarted(ack) => {
                self.resolve_ack(AckKind::Start);
                self.session.begin_listening(&ack);
                self.history.clear();
                self.publish_history();
                log_info!(
                    "listening ({}/{} devices connected)",
                    ack.connected_device_count, ack.total_device_count
                );
            }
            ServerEvent::ListeningStopped => {
                self.resolve_ack(AckKind::Stop);
                self.session.end_listening();
                log_info!("listening stopped");
            }
            ServerEvent::PhaseStarted(started) => self.session.enter_phase(started.phase),
            ServerEvent::WaitingBetweenPhases(wait) => {
                if self.session.is_listening {
                    self.session.wait_remaining_secs = Some(wait.duration.max(0.0));
                }
            }
            ServerEvent::WaitingCountdown(countdown) => {
                if self.session.is_listening {
                    self.session.wait_remaining_secs = Some(countdown.remaining_seconds.max(0.0));
                }
            }
            ServerEvent::InspectionCompleted(done) => {
                match done.barcode.or_else(|| self.session.current_barcode.clone()) {
                    Some(barcode) => {
                        log_info!("inspection {barcode} settled: {}", done.overall_result);
                        self.session.settle(barcode, done.overall_result);
                    }
                    None => self.session.clear_inspection(),
                }
            }
            ServerEvent::InspectionError(fault) => {
                log_warn!("backend reported inspection error: {}", fault.message);
                let ends_current = match (&fault.barcode, &self.session.current_barcode) {
                    (Some(reported), Some(current)) => reported == current,
                    _ => true,
                };
                self.session.last_error = Some(fault.message);
                if ends_current {
                    self.session.clear_inspection();
                }
            }
            ServerEvent::InspectionStopped => self.session.clear_inspection(),
            ServerEvent::BarcodeScanned(scan) => self.session.track_barcode(&scan.barcode),
            ServerEvent::Heartbeat | ServerEvent::ConnectionStatus => {}
        }
        self.publish_session();
    }

    fn record_measurement(&mut self, measurement: Measurement) {
        // History first, so no session edge case can lose the event.
        self.history.append(measurement.clone());
        self.publish_history();

        if !self.session.is_listening {
            return;
        }
        self.session.track_barcode(&measurement.barcode);
        self.session.enter_phase(measurement.phase);

        if measurement.phase.is_last() && measurement.result.is_final() {
            let overall = self
                .history
                .summary_for(&measurement.barcode)
                .map(|summary| summary.overall)
                .filter(|overall| *overall != MeasurementResult::Pending)
                .unwrap_or(measurement.result);
            log_info!("inspection {} settled: {overall}", measurement.barcode);
            self.session.settle(measurement.barcode, overall);
        }
    }

    // ---- timers ---------------------------------------------------------------

    /// Earliest instant at which [`on_timer`](Self::on_timer) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let ack = self.pending.map(|pending| pending.deadline);
        match (self.connection.reconnect_deadline(), ack) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_timer(&mut self, now: Instant) {
        self.connection.poll_reconnect(now);

        if let Some(pending) = self.pending {
            if pending.deadline <= now {
                self.pending = None;
                let message = format!(
                    "{} was not acknowledged within {}ms",
                    pending.kind.command(),
                    self.options.ack_timeout.as_millis()
                );
                log_warn!("{message} (request {})", pending.request_id);
                self.session.last_error = Some(message);
                self.publish_session();
            }
        }

        self.sync_connection();
    }

    fn arm_ack(&mut self, kind: AckKind, request_id: Uuid) {
        self.pending = Some(PendingAck {
            kind,
            request_id,
            deadline: Instant::now() + self.options.ack_timeout,
        });
    }

    fn resolve_ack(&mut self, kind: AckKind) {
        if self.pending.map(|pending| pending.kind) == Some(kind) {
            self.pending = None;
        }
    }

    pub fn awaiting_ack(&self) -> bool {
        self.pending.is_some()
    }

    // ---- publishing -------------------------------------------------------------

    fn sync_connection(&mut self) {
        let state = self.connection.state();
        if state == self.last_connection {
            return;
        }
        self.last_connection = state;

        match state {
            ConnectionState::Connected => {
                self.ever_connected = true;
                if self.session.connection_lost {
                    self.session.connection_lost = false;
                    if self.session.is_listening {
                        // The backend's listening window died with the old link.
                        log_info!("reconnected; listening must be started again");
                        self.session.end_listening();
                    }
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                // Acks cannot arrive over a dead link.
                self.pending = None;
                if self.ever_connected {
                    self.session.connection_lost = true;
                }
                if state == ConnectionState::Failed {
                    self.session.last_error = Some(format!(
                        "connection failed after {} reconnect attempts",
                        self.connection.policy().max_retries
                    ));
                }
            }
            ConnectionState::Connecting => {}
        }
        self.publish_session();
    }

    fn publish_session(&self) {
        self.session_tx.send_if_modified(|published| {
            if *published == self.session {
                return false;
            }
            *published = self.session.clone();
            true
        });
    }

    fn publish_history(&mut self) {
        let latest = self.history.current().cloned();
        self.latest_tx.send_if_modified(|published| {
            if *published == latest {
                return false;
            }
            *published = latest;
            true
        });
        if self.feed.refresh(&self.history) {
            self.publish_feed();
        }
    }

    fn publish_feed(&self) {
        self.feed_tx.send_replace(self.feed.snapshot());
    }
}

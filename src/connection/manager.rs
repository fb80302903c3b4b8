use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use uuid::Uuid;

use crate::{
    protocol::{parse_frame, Command, ProtocolError, ServerEvent},
    session::SessionError,
};

use super::{
    state::{CloseReason, ConnectionState, ReconnectPolicy, RetryDecision},
    transport::{Connector, LinkEvent, LinkNotice, Outbound},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Owns the one logical connection to the backend.
///
/// The manager never blocks: link lifecycle arrives as [`LinkNotice`]s on the
/// receiver returned by [`ConnectionManager::new`], and a pending reconnect
/// is exposed as a deadline for the event loop to sleep on.
pub struct ConnectionManager {
    url: String,
    connector: Box<dyn Connector>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    retries: u32,
    generation: u64,
    link: Option<mpsc::UnboundedSender<Outbound>>,
    reconnect_at: Option<Instant>,
    notices: mpsc::UnboundedSender<LinkNotice>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        connector: Box<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<LinkNotice>) {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            url: url.into(),
            connector,
            policy,
            state,
            retries: 0,
            generation: 0,
            link: None,
            reconnect_at: None,
            notices,
        };
        (manager, notices_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Starts a connection attempt unless one is already open or in flight.
    /// Leaving `Failed` this way starts over with a full retry budget.
    pub fn connect(&mut self) {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => return,
            ConnectionState::Failed => self.retries = 0,
            ConnectionState::Disconnected => {}
        }
        self.reconnect_at = None;
        self.open_link();
    }

    /// Leaves `Failed` (or a pending backoff) with a fresh retry budget.
    pub fn retry_now(&mut self) {
        self.retries = 0;
        self.connect();
    }

    /// Operator-initiated close. Never followed by a reconnect.
    pub fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.retries = 0;
        if let Some(link) = self.link.take() {
            // Receiver already gone means the link ended on its own.
            let _ = link.send(Outbound::Close);
        }
        // Anything the old link still reports is stale from here on.
        self.generation += 1;
        log_info!("connection closed by operator ({:?})", CloseReason::Manual);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Serializes and hands `command` to the live link. No queuing: a
    /// command issued while not connected is rejected outright.
    pub fn send(&mut self, command: &Command) -> Result<Uuid, SessionError> {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(SessionError::NotConnected)?;
        let request_id = Uuid::new_v4();
        let text = command.encode(request_id)?;
        link.send(Outbound::Text(text))
            .map_err(|_| SessionError::LinkClosed)?;
        log_debug!("sent {} ({request_id})", command.kind());
        Ok(request_id)
    }

    /// Fires the scheduled reconnect if its deadline has passed.
    pub fn poll_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(deadline) if deadline <= now => {
                self.reconnect_at = None;
                log_info!(
                    "reconnecting (attempt {}/{})",
                    self.retries,
                    self.policy.max_retries
                );
                self.open_link();
                true
            }
            _ => false,
        }
    }

    /// Applies one link notice. Returns the decoded server event for text
    /// frames that parse; everything else is consumed here.
    pub fn handle(&mut self, notice: LinkNotice) -> Option<ServerEvent> {
        if notice.generation != self.generation {
            log_debug!(
                "ignoring {:?} from superseded link #{}",
                notice.event,
                notice.generation
            );
            return None;
        }

        match notice.event {
            LinkEvent::Opened => {
                self.retries = 0;
                log_info!("connected to {}", self.url);
                self.set_state(ConnectionState::Connected);
                None
            }
            LinkEvent::Text(text) => match parse_frame(&text) {
                Ok(frame) => Some(frame.event),
                Err(err) => {
                    log_warn!("dropping inbound frame: {err}");
                    None
                }
            },
            LinkEvent::Binary(len) => {
                log_warn!("dropping inbound frame: {}", ProtocolError::Binary(len));
                None
            }
            LinkEvent::Closed { code } => {
                self.link_down(CloseReason::from_close_code(code), &format!("closed ({code:?})"));
                None
            }
            LinkEvent::Error(err) => {
                self.link_down(CloseReason::Error, &err);
                None
            }
        }
    }

    fn link_down(&mut self, reason: CloseReason, detail: &str) {
        self.link = None;
        match self.policy.decide(self.retries, reason) {
            RetryDecision::Stay => {
                log_info!("connection ended: {detail}");
                self.set_state(ConnectionState::Disconnected);
            }
            RetryDecision::Retry(delay) => {
                self.retries += 1;
                self.reconnect_at = Some(Instant::now() + delay);
                log_warn!(
                    "connection lost ({reason:?}: {detail}); retry {}/{} in {}ms",
                    self.retries,
                    self.policy.max_retries,
                    delay.as_millis()
                );
                self.set_state(ConnectionState::Disconnected);
            }
            RetryDecision::GiveUp => {
                self.reconnect_at = None;
                log_error!(
                    "connection lost ({reason:?}: {detail}); giving up after {} retries",
                    self.retries
                );
                self.set_state(ConnectionState::Failed);
            }
        }
    }

    fn open_link(&mut self) {
        self.generation += 1;
        self.link = Some(
            self.connector
                .open(&self.url, self.generation, self.notices.clone()),
        );
        self.set_state(ConnectionState::Connecting);
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            log_debug!("connection {current:?} -> {next:?}");
            *current = next;
            true
        });
    }
}

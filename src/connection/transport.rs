use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

use super::state::NORMAL_CLOSURE;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Lifecycle notification from one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Text(String),
    Binary(usize),
    Closed { code: Option<u16> },
    Error(String),
}

/// A [`LinkEvent`] tagged with the attempt that produced it, so notices from
/// superseded links can be told apart from the live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNotice {
    pub generation: u64,
    pub event: LinkEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Close with the normal-closure code and end the link.
    Close,
}

/// Opens links to the backend. One call is one connection attempt.
pub trait Connector: Send {
    /// Starts an attempt against `url`. Every notification for it goes to
    /// `events` tagged with `generation`; frames pushed into the returned
    /// sender are written to the link in order.
    fn open(
        &mut self,
        url: &str,
        generation: u64,
        events: mpsc::UnboundedSender<LinkNotice>,
    ) -> mpsc::UnboundedSender<Outbound>;
}

/// WebSocket transport. Each attempt runs on its own task and ends with
/// exactly one `Closed` or `Error` notice (unless the receiver is gone).
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &mut self,
        url: &str,
        generation: u64,
        events: mpsc::UnboundedSender<LinkNotice>,
    ) -> mpsc::UnboundedSender<Outbound> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(url.to_string(), generation, events, out_rx));
        out_tx
    }
}

async fn run_link(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<LinkNotice>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let notify = |event: LinkEvent| {
        // The event loop is gone when this fails; nothing left to tell.
        let _ = events.send(LinkNotice { generation, event });
    };

    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(err) => {
            log_warn!("link #{generation}: connect to {url} failed: {err}");
            notify(LinkEvent::Error(err.to_string()));
            return;
        }
    };
    log_debug!("link #{generation}: open to {url}");
    notify(LinkEvent::Opened);

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        notify(LinkEvent::Error(err.to_string()));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(err) = sink.send(Message::Close(Some(close))).await {
                        log_debug!("link #{generation}: close frame not sent: {err}");
                    }
                    notify(LinkEvent::Closed { code: Some(NORMAL_CLOSURE) });
                    return;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => notify(LinkEvent::Text(text)),
                Some(Ok(Message::Binary(bytes))) => notify(LinkEvent::Binary(bytes.len())),
                Some(Ok(Message::Close(frame))) => {
                    notify(LinkEvent::Closed {
                        code: frame.map(|frame| u16::from(frame.code)),
                    });
                    return;
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    notify(LinkEvent::Error(err.to_string()));
                    return;
                }
                None => {
                    notify(LinkEvent::Closed { code: None });
                    return;
                }
            },
        }
    }
}

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::transport::{Connector, LinkEvent, LinkNotice, Outbound};

/// In-process connector: records every attempt and captures outbound
/// frames instead of writing them to a socket. Link events are injected by
/// the caller, either straight into the manager or through [`emit`].
///
/// [`emit`]: MemoryConnector::emit
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryLinks>>,
}

#[derive(Default)]
struct MemoryLinks {
    attempts: Vec<(String, u64)>,
    links: Vec<mpsc::UnboundedReceiver<Outbound>>,
    events: Option<(u64, mpsc::UnboundedSender<LinkNotice>)>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn links(&self) -> MutexGuard<'_, MemoryLinks> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.links().attempts.len()
    }

    pub fn last_generation(&self) -> Option<u64> {
        self.links().attempts.last().map(|(_, generation)| *generation)
    }

    pub fn last_url(&self) -> Option<String> {
        self.links().attempts.last().map(|(url, _)| url.clone())
    }

    /// Delivers `event` as if the most recent link had produced it. Returns
    /// false when no link was ever opened or the event loop is gone.
    pub fn emit(&self, event: LinkEvent) -> bool {
        let links = self.links();
        match &links.events {
            Some((generation, events)) => events
                .send(LinkNotice {
                    generation: *generation,
                    event,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Emits a `{type, data}` text frame.
    pub fn emit_json(&self, kind: &str, data: serde_json::Value) -> bool {
        let frame = serde_json::json!({ "type": kind, "data": data });
        self.emit(LinkEvent::Text(frame.to_string()))
    }

    /// Drains every frame written since the last call, across all links.
    pub fn take_sent(&self) -> Vec<Outbound> {
        let mut links = self.links();
        let mut sent = Vec::new();
        for link in links.links.iter_mut() {
            while let Ok(frame) = link.try_recv() {
                sent.push(frame);
            }
        }
        sent
    }

    /// Text frames only, decoded as JSON.
    pub fn take_sent_json(&self) -> Vec<serde_json::Value> {
        self.take_sent()
            .into_iter()
            .filter_map(|frame| match frame {
                Outbound::Text(text) => serde_json::from_str(&text).ok(),
                Outbound::Close => None,
            })
            .collect()
    }
}

impl Connector for MemoryConnector {
    fn open(
        &mut self,
        url: &str,
        generation: u64,
        events: mpsc::UnboundedSender<LinkNotice>,
    ) -> mpsc::UnboundedSender<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut links = self.links();
        links.attempts.push((url.to_string(), generation));
        links.links.push(rx);
        links.events = Some((generation, events));
        tx
    }
}

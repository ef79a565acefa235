//! Outbound gossip seam
//!
//! Engines, heartbeats and discovery replies only ever need to broadcast or
//! answer one peer. `GossipTransport` is the production sink;
//! `RecordingSink` captures traffic for tests and offline runs.

use bridge_gossip::{GossipTransport, Message};
use parking_lot::Mutex;

pub trait GossipSink: Send + Sync {
    /// Send to every peer, returns how many accepted it
    fn broadcast(&self, message: Message) -> usize;

    fn send_to(&self, peer_id: &str, message: Message) -> bool;
}

impl GossipSink for GossipTransport {
    fn broadcast(&self, message: Message) -> usize {
        GossipTransport::broadcast(self, message)
    }

    fn send_to(&self, peer_id: &str, message: Message) -> bool {
        GossipTransport::send_to(self, peer_id, message)
    }
}

/// Sink that remembers what was sent; `None` target means broadcast
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Option<String>, Message)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Option<String>, Message)> {
        self.sent.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|(target, _)| target.is_none())
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn take(&self) -> Vec<(Option<String>, Message)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl GossipSink for RecordingSink {
    fn broadcast(&self, message: Message) -> usize {
        self.sent.lock().push((None, message));
        1
    }

    fn send_to(&self, peer_id: &str, message: Message) -> bool {
        self.sent.lock().push((Some(peer_id.to_string()), message));
        true
    }
}

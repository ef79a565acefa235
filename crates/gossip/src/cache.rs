//! TTL cache of recently seen message hashes
//!
//! Loop prevention only: a hash is remembered for `ttl` after it was first
//! recorded and forgotten by the next sweep after that.

use crate::message::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CachedMessage {
    kind: &'static str,
    expires_at: Instant,
}

pub struct MessageCache {
    ttl: Duration,
    entries: DashMap<String, CachedMessage>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_TTL)
    }
}

impl MessageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn message_seen(&self, hash: &str) -> bool {
        self.entries
            .get(hash)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }

    pub fn record_message(&self, hash: &str, message: &Message) {
        self.record_message_at(hash, message, Instant::now());
    }

    pub fn record_message_at(&self, hash: &str, message: &Message, now: Instant) {
        self.entries.insert(
            hash.to_string(),
            CachedMessage {
                kind: message.kind(),
                expires_at: now + self.ttl,
            },
        );
    }

    /// Record `hash` unless it is already live; returns true when newly recorded
    pub fn check_and_record(&self, hash: &str, message: &Message) -> bool {
        self.check_and_record_at(hash, message, Instant::now())
    }

    pub fn check_and_record_at(&self, hash: &str, message: &Message, now: Instant) -> bool {
        let fresh = CachedMessage {
            kind: message.kind(),
            expires_at: now + self.ttl,
        };
        match self.entries.entry(hash.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return false;
                }
                occupied.insert(fresh);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    /// Drop expired hashes, returns how many were removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::trace!("Swept {} expired message hashes", removed);
        }
        removed
    }

    /// Count of cached hashes per message type
    pub fn kinds(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for entry in self.entries.iter() {
            match counts.iter_mut().find(|(kind, _)| *kind == entry.kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((entry.kind, 1)),
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

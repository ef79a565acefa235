//! Peer directory
//!
//! Owns the set of established sessions and the dedup cache. Entries are
//! keyed by the random session id a peer announced in its handshake, which
//! is not an operator identity.

use crate::cache::MessageCache;
use crate::channel::PeerChannel;
use crate::codec::now_ms;
use crate::error::PeerError;
use crate::message::Message;
use crate::probe::ReachabilityProbe;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: String,
    /// Verified public address, `None` for private peers
    pub address: Option<String>,
    /// Address we dialed, verified or not; dedups redials
    pub dialed: Option<String>,
    /// We dialed this peer
    pub outbound: bool,
    /// Local token of the session that registered the entry
    pub session: u64,
    pub channel: PeerChannel,
    pub connected_at: u64,
}

impl PeerHandle {
    pub fn is_public(&self) -> bool {
        self.address.is_some()
    }
}

/// Read-only view for the status surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub address: Option<String>,
    pub public: bool,
    pub outbound: bool,
    pub connected_at: u64,
}

impl From<&PeerHandle> for PeerInfo {
    fn from(handle: &PeerHandle) -> Self {
        Self {
            id: handle.id.clone(),
            address: handle.address.clone(),
            public: handle.is_public(),
            outbound: handle.outbound,
            connected_at: handle.connected_at,
        }
    }
}

pub struct PeerDirectory {
    peers: DashMap<String, PeerHandle>,
    probe: Arc<dyn ReachabilityProbe>,
    cache: MessageCache,
}

impl PeerDirectory {
    /// Empty directory. Claimed addresses are verified through `probe`;
    /// `cache` is the shared dedup table for flooded messages.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, cache: MessageCache) -> Self {
        Self {
            peers: DashMap::new(),
            probe,
            cache,
        }
    }

    /// Register an established session
    ///
    /// A duplicate id closes `channel` and leaves the existing entry alone.
    /// The claimed address is kept only if it passes the reachability probe.
    pub async fn add_peer(
        &self,
        id: &str,
        channel: PeerChannel,
        address: Option<String>,
        outbound: bool,
        session: u64,
    ) -> Result<(), PeerError> {
        if self.peers.contains_key(id) {
            channel.close();
            return Err(PeerError::Duplicate(id.to_string()));
        }

        let dialed = if outbound { address.clone() } else { None };
        let address = match address {
            Some(address) => {
                if self.probe.is_reachable(&address).await {
                    Some(address)
                } else {
                    tracing::debug!("Peer {} claimed {} but failed the probe", id, address);
                    None
                }
            }
            None => None,
        };

        // Re-check: another session may have registered while we probed
        match self.peers.entry(id.to_string()) {
            Entry::Occupied(_) => {
                channel.close();
                Err(PeerError::Duplicate(id.to_string()))
            }
            Entry::Vacant(vacant) => {
                tracing::info!(
                    "Peer {} registered ({}, {})",
                    id,
                    address.as_deref().unwrap_or("private"),
                    if outbound { "outbound" } else { "inbound" }
                );
                vacant.insert(PeerHandle {
                    id: id.to_string(),
                    address,
                    dialed,
                    outbound,
                    session,
                    channel,
                    connected_at: now_ms(),
                });
                Ok(())
            }
        }
    }

    /// Close and evict a peer
    pub fn remove_peer(&self, id: &str) -> Option<PeerHandle> {
        let (_, handle) = self.peers.remove(id)?;
        handle.channel.close();
        tracing::info!("Peer {} removed", id);
        Some(handle)
    }

    /// Evict only if the entry still belongs to `session`
    pub fn remove_session(&self, id: &str, session: u64) -> bool {
        match self.peers.remove_if(id, |_, handle| handle.session == session) {
            Some((_, handle)) => {
                handle.channel.close();
                tracing::info!("Peer {} disconnected", id);
                true
            }
            None => false,
        }
    }

    /// Cloned handle for peer `id`
    pub fn get(&self, id: &str) -> Option<PeerHandle> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Peers with a verified address
    pub fn public_peers(&self) -> Vec<PeerHandle> {
        self.filtered(|h| h.is_public())
    }

    /// Peers we cannot dial back
    pub fn private_peers(&self) -> Vec<PeerHandle> {
        self.filtered(|h| !h.is_public())
    }

    pub fn all_peers(&self) -> Vec<PeerHandle> {
        self.filtered(|_| true)
    }

    fn filtered(&self, keep: impl Fn(&PeerHandle) -> bool) -> Vec<PeerHandle> {
        self.peers
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Status API view, longest connected first
    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self.peers.iter().map(|e| PeerInfo::from(e.value())).collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }

    /// Whether a peer with this verified or dialed address is connected
    pub fn is_connected_to(&self, address: &str) -> bool {
        self.peers.iter().any(|entry| {
            let handle = entry.value();
            handle.address.as_deref() == Some(address) || handle.dialed.as_deref() == Some(address)
        })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether `hash` is still in the dedup cache
    pub fn message_seen(&self, hash: &str) -> bool {
        self.cache.message_seen(hash)
    }

    /// Remember `hash` until the cache TTL lapses. Prefer
    /// `check_and_record` on the receive path.
    pub fn record_message(&self, hash: &str, message: &Message) {
        self.cache.record_message(hash, message)
    }

    /// Atomic dedup gate, true if this is the first sighting
    pub fn check_and_record(&self, hash: &str, message: &Message) -> bool {
        self.cache.check_and_record(hash, message)
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }
}

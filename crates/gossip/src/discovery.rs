//! Peer discovery
//!
//! Keeps the public peer count near the target: asks for peer lists when
//! short, dials what comes back one at a time, and randomly evicts surplus
//! connections.

use crate::message::{Message, PeerList};
use crate::transport::GossipTransport;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct PeerDiscovery {
    transport: Arc<GossipTransport>,
    /// Addresses with a dial in flight
    dialing: Mutex<HashSet<String>>,
}

impl PeerDiscovery {
    pub fn new(transport: Arc<GossipTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            dialing: Mutex::new(HashSet::new()),
        })
    }

    /// One maintenance pass
    pub async fn tick(self: &Arc<Self>) {
        self.prune_surplus();

        let known = self.transport.config().known_peers.clone();
        for address in known {
            self.dial(&address).await;
        }

        let target = self.transport.config().target_peers;
        let public = self.transport.directory().public_peers().len();
        if public < target {
            tracing::debug!("{} public peers (target {}), requesting peers", public, target);
            self.transport.broadcast(Message::RequestPeers);
        }
    }

    /// Randomly evict public and private peers above the target
    pub fn prune_surplus(&self) -> usize {
        let target = self.transport.config().target_peers;
        let directory = self.transport.directory();
        let mut rng = rand::thread_rng();
        let mut evicted = 0;

        for mut group in [directory.public_peers(), directory.private_peers()] {
            if group.len() <= target {
                continue;
            }
            group.shuffle(&mut rng);
            for peer in group.iter().skip(target) {
                if directory.remove_peer(&peer.id).is_some() {
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            tracing::info!("Evicted {} surplus peers", evicted);
        }
        evicted
    }

    /// Reply to `REQUEST_PEERS` with verified public addresses only
    pub fn handle_peer_request(&self, sender: &str) {
        let peers: Vec<String> = self
            .transport
            .directory()
            .public_peers()
            .into_iter()
            .filter(|peer| peer.id != sender)
            .filter_map(|peer| peer.address)
            .collect();
        tracing::debug!("Sending {} peer addresses to {}", peers.len(), sender);
        self.transport
            .send_to(sender, Message::PeerList(PeerList { peers }));
    }

    /// Dial unseen addresses from a `PEER_LIST`, paced, in the background.
    ///
    /// Skips our own address, repeats within the list, and peers we already
    /// hold; stops dialing once the public target is met. The task yields
    /// the number of dials attempted.
    pub fn handle_peer_list(self: &Arc<Self>, list: PeerList) -> JoinHandle<usize> {
        let discovery = self.clone();
        tokio::spawn(async move {
            let pacing = discovery.transport.config().connect_pacing;
            let mut seen = HashSet::new();
            let mut attempts = 0;
            for address in list.peers {
                if !seen.insert(address.clone()) {
                    continue;
                }
                if discovery.dial(&address).await {
                    attempts += 1;
                    tokio::time::sleep(pacing).await;
                }
            }
            attempts
        })
    }

    fn should_dial(&self, address: &str) -> bool {
        let directory = self.transport.directory();
        self.transport.public_address() != Some(address)
            && !directory.is_connected_to(address)
            && directory.public_peers().len() < self.transport.config().target_peers
    }

    /// Returns true if a dial was attempted
    async fn dial(&self, address: &str) -> bool {
        if !self.should_dial(address) {
            return false;
        }
        if !self.dialing.lock().insert(address.to_string()) {
            return false;
        }

        if let Err(e) = self.transport.connect(address).await {
            tracing::debug!("Could not connect to {}: {}", address, e);
        }

        self.dialing.lock().remove(address);
        true
    }

    /// Run `tick` every peer check interval
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let discovery = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(discovery.transport.config().peer_check_interval);
            loop {
                ticker.tick().await;
                discovery.tick().await;
            }
        })
    }
}

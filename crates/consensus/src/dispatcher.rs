//! Routes inbound gossip to its owner
//!
//! Dispatch never awaits. Heartbeats, discovery and signature requests are
//! handled inline; signature bundles go onto the owning engine's queue so
//! slow chain RPC in one engine cannot hold up the rest of the node.

use crate::engine::ThresholdEngine;
use crate::error::HeartbeatError;
use crate::operators::OperatorRegistry;
use bridge_gossip::{InboundMessage, Message, PeerDiscovery};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub struct Dispatcher {
    registry: Arc<OperatorRegistry>,
    /// Absent when running without a live transport
    discovery: Option<Arc<PeerDiscovery>>,
    mint: Arc<ThresholdEngine>,
    redemption: Arc<ThresholdEngine>,
    governance: Arc<ThresholdEngine>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<OperatorRegistry>,
        discovery: Option<Arc<PeerDiscovery>>,
        mint: Arc<ThresholdEngine>,
        redemption: Arc<ThresholdEngine>,
        governance: Arc<ThresholdEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            discovery,
            mint,
            redemption,
            governance,
        })
    }

    /// Route one message. Returns immediately.
    pub fn dispatch(&self, inbound: InboundMessage) {
        let sender = inbound.sender;
        match inbound.message {
            // Consumed by the transport during the handshake
            Message::Hello(_) | Message::HelloAck(_) => {}
            Message::Heartbeat(heartbeat) => match self.registry.handle_heartbeat(&heartbeat) {
                Ok(()) => {}
                Err(HeartbeatError::Stale { age_ms }) => {
                    tracing::debug!("Stale heartbeat from {} ({}ms)", heartbeat.operator, age_ms);
                }
                Err(e) => tracing::warn!("Rejected heartbeat via {}: {}", sender, e),
            },
            Message::RequestPeers => {
                if let Some(discovery) = &self.discovery {
                    discovery.handle_peer_request(&sender);
                }
            }
            Message::PeerList(list) => {
                if let Some(discovery) = &self.discovery {
                    discovery.handle_peer_list(list);
                }
            }
            Message::MintSignatures(bundle) => {
                self.mint.enqueue_bundle(bundle);
            }
            Message::RequestMintSignatures(request) => {
                self.mint.handle_request(&sender, &request);
            }
            Message::RedemptionSignatures(bundle) => {
                self.redemption.enqueue_bundle(bundle);
            }
            Message::RequestRedemptionSignatures(request) => {
                self.redemption.handle_request(&sender, &request);
            }
            Message::GovernanceSignatures(bundle) => {
                self.governance.enqueue_bundle(bundle);
            }
            Message::RequestGovernanceSignatures(request) => {
                self.governance.handle_request(&sender, &request);
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, mut inbound: broadcast::Receiver<InboundMessage>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(message) => dispatcher.dispatch(message),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Dispatcher lagged, {} messages missed", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

//! Gossip transport
//!
//! Every connection, dialed or accepted, runs the same session:
//! handshake under a timeout, then a read loop that rate limits, parses,
//! dedups, dispatches to subscribers and floods non-personal frames to every
//! other peer. Parse failures and handshake violations close the session.

use crate::cache::{MessageCache, DEFAULT_MESSAGE_TTL, DEFAULT_SWEEP_INTERVAL};
use crate::channel::{self, PeerChannel};
use crate::codec::{WireCodec, DEFAULT_MAX_MESSAGE_AGE_MS, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::{HandshakeError, PeerError};
use crate::handshake::{validate_peer_id, ConnectionState, Role};
use crate::message::{Hello, HelloAck, Message};
use crate::peers::PeerDirectory;
use crate::probe::ReachabilityProbe;
use crate::rate_limit::{RateLimiter, DEFAULT_MESSAGES_PER_SECOND};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;

/// Path the gossip WebSocket is served on
pub const P2P_PATH: &str = "/p2p";

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Our public `host:port`, `None` for a private node
    pub public_address: Option<String>,
    pub target_peers: usize,
    /// Inbound handshakes are refused at or above this many peers
    pub max_connections: usize,
    /// Messages per peer per second
    pub rate_limit: usize,
    pub handshake_timeout: Duration,
    pub max_message_size: usize,
    pub max_message_age: Duration,
    pub message_ttl: Duration,
    pub sweep_interval: Duration,
    pub peer_check_interval: Duration,
    /// Delay between dials when working through a peer list
    pub connect_pacing: Duration,
    /// Addresses re-dialed on every peer check
    pub known_peers: Vec<String>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            public_address: None,
            target_peers: 5,
            max_connections: 10,
            rate_limit: DEFAULT_MESSAGES_PER_SECOND,
            handshake_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_message_age: Duration::from_millis(DEFAULT_MAX_MESSAGE_AGE_MS),
            message_ttl: DEFAULT_MESSAGE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            peer_check_interval: Duration::from_secs(10),
            connect_pacing: Duration::from_millis(500),
            known_peers: Vec::new(),
        }
    }
}

/// A fresh message delivered to subscribers
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Session id of the peer that handed it to us
    pub sender: String,
    pub message: Message,
}

pub struct GossipTransport {
    config: GossipConfig,
    my_id: String,
    directory: PeerDirectory,
    codec: WireCodec,
    inbound: broadcast::Sender<InboundMessage>,
    next_session: AtomicU64,
}

impl GossipTransport {
    pub fn new(config: GossipConfig, probe: Arc<dyn ReachabilityProbe>) -> Arc<Self> {
        let (inbound, _) = broadcast::channel(1024);
        let codec = WireCodec::new(
            config.max_message_size,
            config.max_message_age.as_millis() as u64,
        );
        let directory = PeerDirectory::new(probe, MessageCache::new(config.message_ttl));
        Arc::new(Self {
            config,
            my_id: uuid::Uuid::new_v4().to_string(),
            directory,
            codec,
            inbound,
            next_session: AtomicU64::new(1),
        })
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    pub fn public_address(&self) -> Option<&str> {
        self.config.public_address.as_deref()
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Fresh, deduplicated messages from any peer
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    /// Router exposing the gossip WebSocket
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(P2P_PATH, get(upgrade))
            .with_state(self.clone())
    }

    /// Dial `address` and run the session in the background
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<(), HandshakeError> {
        if self.public_address() == Some(address) {
            return Err(HandshakeError::SelfConnection);
        }

        let url = format!("ws://{}{}", address, P2P_PATH);
        let (ws, _) = tokio::time::timeout(self.config.handshake_timeout, connect_async(url))
            .await
            .map_err(|_| HandshakeError::Timeout)?
            .map_err(|e| HandshakeError::Dial(e.to_string()))?;
        tracing::debug!("Dialed {}", address);

        let (channel, inbound) = channel::from_tungstenite(ws);
        self.spawn_session(
            channel,
            inbound,
            Role::Outbound {
                address: address.to_string(),
            },
        );
        Ok(())
    }

    pub fn spawn_session(
        self: &Arc<Self>,
        channel: PeerChannel,
        inbound: mpsc::Receiver<String>,
        role: Role,
    ) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move { transport.run_session(channel, inbound, role).await })
    }

    pub async fn run_session(
        self: Arc<Self>,
        channel: PeerChannel,
        mut inbound: mpsc::Receiver<String>,
        role: Role,
    ) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut state = ConnectionState::Connecting;
        tracing::trace!("Session {} {:?}", session, state);

        if matches!(role, Role::Outbound { .. }) {
            let hello = Message::Hello(Hello {
                peer_id: self.my_id.clone(),
                address: self.config.public_address.clone(),
            });
            if !self.send_on(&channel, hello) {
                return;
            }
        }
        state = ConnectionState::AwaitingHandshake;
        tracing::trace!("Session {} {:?}", session, state);

        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            self.handshake(&channel, &mut inbound, &role),
        )
        .await
        .unwrap_or(Err(HandshakeError::Timeout));

        let (peer_id, address) = match handshake {
            Ok(peer) => peer,
            Err(e) => {
                tracing::debug!("Handshake failed ({:?}): {}", role, e);
                channel.close();
                return;
            }
        };

        let outbound = matches!(role, Role::Outbound { .. });
        if let Err(e) = self
            .directory
            .add_peer(&peer_id, channel.clone(), address, outbound, session)
            .await
        {
            tracing::debug!("Not registering peer {}: {}", peer_id, e);
            return;
        }
        state = ConnectionState::Established;
        tracing::debug!("Session {} with {} {:?}", session, peer_id, state);

        let mut limiter = RateLimiter::new(self.config.rate_limit);
        while let Some(raw) = inbound.recv().await {
            if !limiter.allow() {
                tracing::warn!("Peer {} exceeded rate limit, dropping message", peer_id);
                continue;
            }

            let wire = match self.codec.parse(&raw) {
                Ok(wire) => wire,
                Err(e) => {
                    tracing::warn!("Closing peer {}: {}", peer_id, e);
                    break;
                }
            };

            if matches!(wire.message, Message::Hello(_) | Message::HelloAck(_)) {
                tracing::debug!("Ignoring repeated handshake from {}", peer_id);
                continue;
            }

            if !self.directory.check_and_record(&wire.hash, &wire.message) {
                tracing::trace!("Duplicate {} {} from {}", wire.message.kind(), wire.hash, peer_id);
                continue;
            }

            let personal = wire.message.is_personal();
            let _ = self.inbound.send(InboundMessage {
                sender: peer_id.clone(),
                message: wire.message,
            });
            if !personal {
                self.forward(&raw, &peer_id);
            }
        }

        state = ConnectionState::Closed;
        self.directory.remove_session(&peer_id, session);
        channel.close();
        tracing::debug!("Session {} with {} {:?}", session, peer_id, state);
    }

    /// Returns the peer's id and the address to verify
    async fn handshake(
        &self,
        channel: &PeerChannel,
        inbound: &mut mpsc::Receiver<String>,
        role: &Role,
    ) -> Result<(String, Option<String>), HandshakeError> {
        let raw = inbound.recv().await.ok_or(HandshakeError::ChannelClosed)?;
        let wire = self.codec.parse(&raw)?;

        match (role, wire.message) {
            (Role::Inbound, Message::Hello(hello)) => {
                if self.directory.len() >= self.config.max_connections {
                    return Err(PeerError::AtCapacity(self.config.max_connections).into());
                }
                validate_peer_id(&hello.peer_id, &self.my_id)?;
                if self.directory.contains(&hello.peer_id) {
                    return Err(PeerError::Duplicate(hello.peer_id).into());
                }
                let ack = Message::HelloAck(HelloAck {
                    peer_id: self.my_id.clone(),
                });
                if !self.send_on(channel, ack) {
                    return Err(HandshakeError::ChannelClosed);
                }
                Ok((hello.peer_id, hello.address))
            }
            (Role::Outbound { address }, Message::HelloAck(ack)) => {
                validate_peer_id(&ack.peer_id, &self.my_id)?;
                if self.directory.contains(&ack.peer_id) {
                    return Err(PeerError::Duplicate(ack.peer_id).into());
                }
                Ok((ack.peer_id, Some(address.clone())))
            }
            (role, other) => Err(HandshakeError::Unexpected {
                expected: role.expected_first(),
                got: other.kind(),
            }),
        }
    }

    /// Frame, record in the dedup cache, write
    fn send_on(&self, channel: &PeerChannel, message: Message) -> bool {
        match self.codec.encode(message) {
            Ok((wire, text)) => {
                self.directory.record_message(&wire.hash, &wire.message);
                channel.send_text(text)
            }
            Err(e) => {
                tracing::error!("Failed to encode message: {}", e);
                false
            }
        }
    }

    /// Send to a single peer
    pub fn send_to(&self, peer_id: &str, message: Message) -> bool {
        match self.directory.get(peer_id) {
            Some(peer) => self.send_on(&peer.channel, message),
            None => {
                tracing::debug!("Peer {} gone, dropping {}", peer_id, message.kind());
                false
            }
        }
    }

    /// Send to every connected peer, returns how many accepted the frame
    pub fn broadcast(&self, message: Message) -> usize {
        let (wire, text) = match self.codec.encode(message) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to encode message: {}", e);
                return 0;
            }
        };
        self.directory.record_message(&wire.hash, &wire.message);

        let sent = self
            .directory
            .all_peers()
            .iter()
            .filter(|peer| peer.channel.send_text(text.clone()))
            .count();
        tracing::trace!("Broadcast {} to {} peers", wire.message.kind(), sent);
        sent
    }

    /// Relay a received frame unchanged to every peer but `except`
    fn forward(&self, raw: &str, except: &str) -> usize {
        self.directory
            .all_peers()
            .iter()
            .filter(|peer| peer.id != except)
            .filter(|peer| peer.channel.send_text(raw.to_string()))
            .count()
    }

    /// Periodically drop expired dedup entries
    pub fn spawn_cache_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(transport.config.sweep_interval);
            loop {
                ticker.tick().await;
                transport.directory.cache().sweep();
            }
        })
    }
}

async fn upgrade(
    State(transport): State<Arc<GossipTransport>>,
    ws: WebSocketUpgrade,
) -> Response {
    let max = transport.config.max_message_size;
    ws.max_message_size(max).on_upgrade(move |socket| async move {
        let (channel, inbound) = channel::from_axum(socket);
        transport.run_session(channel, inbound, Role::Inbound).await;
    })
}

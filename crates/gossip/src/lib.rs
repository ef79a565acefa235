//! Bridge Gossip - Operator mesh over WebSockets
//!
//! Architecture:
//! - Every frame is hashed and timestamped by the wire codec
//! - Sessions handshake (HELLO / HELLO_ACK), then flood fresh messages
//! - A TTL dedup cache stops loops, a per-peer limiter stops floods
//! - Discovery keeps the public peer count near a target

pub mod cache;
pub mod channel;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peers;
pub mod probe;
pub mod rate_limit;
pub mod transport;

#[cfg(test)]
mod tests;

pub use codec::{WireCodec, WireMessage};
pub use discovery::PeerDiscovery;
pub use error::{CodecError, HandshakeError, PeerError};
pub use message::{
    Heartbeat, Hello, HelloAck, Message, PeerList, SignatureBundle, SignatureRequest, SignedVote,
};
pub use peers::{PeerDirectory, PeerHandle, PeerInfo};
pub use probe::{FixedProbe, HttpProbe, ReachabilityProbe};
pub use transport::{GossipConfig, GossipTransport, InboundMessage};

//! Connection handshake rules

use crate::error::HandshakeError;
use uuid::{Uuid, Version};

/// Per-connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingHandshake,
    Established,
    Closed,
}

/// Which side opened the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// We dialed `address`
    Outbound { address: String },
    Inbound,
}

impl Role {
    /// Message type this side must receive first
    pub fn expected_first(&self) -> &'static str {
        match self {
            Role::Outbound { .. } => "HELLO_ACK",
            Role::Inbound => "HELLO",
        }
    }
}

/// A peer id must be a random (v4) UUID and must not be our own
pub fn validate_peer_id(peer_id: &str, my_id: &str) -> Result<(), HandshakeError> {
    let parsed =
        Uuid::parse_str(peer_id).map_err(|_| HandshakeError::InvalidPeerId(peer_id.to_string()))?;
    if parsed.get_version() != Some(Version::Random) {
        return Err(HandshakeError::InvalidPeerId(peer_id.to_string()));
    }
    if peer_id == my_id {
        return Err(HandshakeError::SelfConnection);
    }
    Ok(())
}

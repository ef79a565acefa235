//! Gossip error types

use thiserror::Error;

/// Reasons a raw frame is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Stale frame: timestamp {timestamp}, now {now}")]
    Stale { timestamp: u64, now: u64 },

    #[error("Hash mismatch")]
    HashMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Peer {0} is already connected")]
    Duplicate(String),

    #[error("Connection cap of {0} reached")]
    AtCapacity(usize),
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Handshake timed out")]
    Timeout,

    #[error("Expected {expected}, got {got}")]
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("Refusing connection to self")]
    SelfConnection,

    #[error("Channel closed during handshake")]
    ChannelClosed,

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Dial failed: {0}")]
    Dial(String),
}

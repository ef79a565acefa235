//! Closed set of gossip messages

use serde::{Deserialize, Serialize};

/// Handshake opener sent by the dialing side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub peer_id: String,
    /// Claimed public `host:port`, absent for private nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    pub peer_id: String,
}

/// Signed operator liveness beacon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub operator: String,
    pub peer_id: String,
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList {
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVote {
    pub operator: String,
    pub signature: String,
}

/// Signatures a node holds for one pending entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBundle {
    pub key: String,
    pub votes: Vec<SignedVote>,
}

/// Ask peers to resend what they hold for `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Hello(Hello),
    HelloAck(HelloAck),
    Heartbeat(Heartbeat),
    RequestPeers,
    PeerList(PeerList),
    MintSignatures(SignatureBundle),
    RequestMintSignatures(SignatureRequest),
    RedemptionSignatures(SignatureBundle),
    RequestRedemptionSignatures(SignatureRequest),
    GovernanceSignatures(SignatureBundle),
    RequestGovernanceSignatures(SignatureRequest),
}

impl Message {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "HELLO",
            Message::HelloAck(_) => "HELLO_ACK",
            Message::Heartbeat(_) => "HEARTBEAT",
            Message::RequestPeers => "REQUEST_PEERS",
            Message::PeerList(_) => "PEER_LIST",
            Message::MintSignatures(_) => "MINT_SIGNATURES",
            Message::RequestMintSignatures(_) => "REQUEST_MINT_SIGNATURES",
            Message::RedemptionSignatures(_) => "REDEMPTION_SIGNATURES",
            Message::RequestRedemptionSignatures(_) => "REQUEST_REDEMPTION_SIGNATURES",
            Message::GovernanceSignatures(_) => "GOVERNANCE_SIGNATURES",
            Message::RequestGovernanceSignatures(_) => "REQUEST_GOVERNANCE_SIGNATURES",
        }
    }

    /// Personal messages are addressed to one peer and never rebroadcast
    pub fn is_personal(&self) -> bool {
        matches!(
            self,
            Message::Hello(_)
                | Message::HelloAck(_)
                | Message::RequestPeers
                | Message::PeerList(_)
                | Message::RequestMintSignatures(_)
                | Message::RequestRedemptionSignatures(_)
                | Message::RequestGovernanceSignatures(_)
        )
    }
}

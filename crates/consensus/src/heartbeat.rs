//! Signed operator heartbeats

use crate::error::HeartbeatError;
use crate::operators::OperatorRegistry;
use crate::sink::GossipSink;
use bridge_chain::crypto::sha256;
use bridge_chain::{ChainError, ChainFamily, Digest, OperatorCredential, PublicKey, Signer};
use bridge_gossip::codec::now_ms;
use bridge_gossip::{Heartbeat, Message};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody<'a> {
    operator: &'a str,
    peer_id: &'a str,
    timestamp: u64,
}

/// sha256 over the compact JSON of `{operator, peerId, timestamp}`
pub fn heartbeat_digest(operator: &str, peer_id: &str, timestamp: u64) -> Digest {
    let body = HeartbeatBody {
        operator,
        peer_id,
        timestamp,
    };
    // Serializing a struct of strings and an integer cannot fail
    let json = serde_json::to_vec(&body).unwrap_or_default();
    sha256(&json)
}

pub fn sign_heartbeat(
    credential: &OperatorCredential,
    peer_id: &str,
    timestamp: u64,
) -> Result<Heartbeat, ChainError> {
    let digest = heartbeat_digest(credential.username(), peer_id, timestamp);
    Ok(Heartbeat {
        operator: credential.username().to_string(),
        peer_id: peer_id.to_string(),
        timestamp,
        signature: ChainFamily::Hive.sign(credential, &digest)?,
    })
}

/// Check freshness and that the signature recovers to `key`
pub fn verify_heartbeat(
    heartbeat: &Heartbeat,
    key: &PublicKey,
    now: u64,
    max_age_ms: u64,
) -> Result<(), HeartbeatError> {
    let age_ms = now.abs_diff(heartbeat.timestamp);
    if age_ms > max_age_ms {
        return Err(HeartbeatError::Stale { age_ms });
    }
    let digest = heartbeat_digest(&heartbeat.operator, &heartbeat.peer_id, heartbeat.timestamp);
    match ChainFamily::Hive.recover(&digest, &heartbeat.signature) {
        Ok(Signer::PublicKey(recovered)) if &recovered == key => Ok(()),
        _ => Err(HeartbeatError::BadSignature(heartbeat.operator.clone())),
    }
}

/// Periodically announces that the local operator is alive
pub struct HeartbeatService {
    registry: Arc<OperatorRegistry>,
    sink: Arc<dyn GossipSink>,
    credential: OperatorCredential,
    peer_id: String,
    interval: Duration,
}

impl HeartbeatService {
    pub fn new(
        registry: Arc<OperatorRegistry>,
        sink: Arc<dyn GossipSink>,
        credential: OperatorCredential,
        peer_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            sink,
            credential,
            peer_id: peer_id.into(),
            interval,
        }
    }

    /// Sign and gossip one heartbeat, marking ourselves seen
    pub fn beat(&self) -> bool {
        let now = now_ms();
        match sign_heartbeat(&self.credential, &self.peer_id, now) {
            Ok(heartbeat) => {
                self.registry.mark_seen(self.credential.username(), now);
                self.sink.broadcast(Message::Heartbeat(heartbeat));
                true
            }
            Err(e) => {
                tracing::error!("Failed to sign heartbeat: {}", e);
                false
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.beat();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_heartbeat_verifies() {
        let alice = OperatorCredential::generate("alice", &mut rand::thread_rng());
        let hb = sign_heartbeat(&alice, "peer-1", 1_000).unwrap();
        assert!(verify_heartbeat(&hb, &alice.public_key(), 2_000, 10_000).is_ok());
    }

    #[test]
    fn test_stale_or_forged_heartbeat_rejected() {
        let alice = OperatorCredential::generate("alice", &mut rand::thread_rng());
        let mallory = OperatorCredential::generate("alice", &mut rand::thread_rng());

        let hb = sign_heartbeat(&alice, "peer-1", 1_000).unwrap();
        assert!(matches!(
            verify_heartbeat(&hb, &alice.public_key(), 20_000, 10_000),
            Err(HeartbeatError::Stale { .. })
        ));

        let forged = sign_heartbeat(&mallory, "peer-1", 1_000).unwrap();
        assert!(matches!(
            verify_heartbeat(&forged, &alice.public_key(), 1_000, 10_000),
            Err(HeartbeatError::BadSignature(_))
        ));

        let mut moved = hb.clone();
        moved.peer_id = "peer-2".to_string();
        assert!(verify_heartbeat(&moved, &alice.public_key(), 1_000, 10_000).is_err());
    }
}

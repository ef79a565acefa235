//! Node Configuration

use anyhow::Context;
use bridge_chain::Authority;
use bridge_consensus::{EngineConfig, EngineKind, RegistryConfig, RemovedOperatorPolicy, RetryPolicy};
use bridge_gossip::GossipConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Operator node configuration, all durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// Public peers to keep connected
    pub target_peers: usize,
    /// Inbound connection cap
    pub max_connections: usize,
    /// Messages per peer per second
    pub rate_limit: usize,
    pub handshake_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    /// Largest accepted frame in bytes
    pub max_message_size: usize,
    /// Freshness window for wire messages
    pub max_message_age_ms: u64,
    pub message_ttl_ms: u64,
    pub peer_check_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub operator_timeout_ms: u64,
    pub registry_refresh_ms: u64,
    pub mint_expiry_ms: u64,
    pub redemption_expiry_ms: u64,
    pub governance_expiry_ms: u64,
    pub tick_interval_ms: u64,
    /// Mint / redemption table size bound
    pub size_bound: usize,
    pub vote_retry_attempts: u32,
    pub vote_retry_delay_ms: u64,
    /// Early votes held per engine
    pub vote_buffer_limit: usize,
    /// Peer bundles queued per engine
    pub bundle_queue: usize,
    pub removed_operator_policy: RemovedOperatorPolicy,
    /// Seed signer set for the in-memory chain backend
    pub authority: Option<Authority>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            target_peers: 5,
            max_connections: 10,
            rate_limit: 20,
            handshake_timeout_ms: 5_000,
            probe_timeout_ms: 2_000,
            max_message_size: 256 * 1024,
            max_message_age_ms: 8_000,
            message_ttl_ms: 10_000,
            peer_check_interval_ms: 10_000,
            heartbeat_interval_ms: 10_000,
            operator_timeout_ms: 30_000,
            registry_refresh_ms: 5 * 60 * 1000,
            mint_expiry_ms: 7 * DAY_MS,
            redemption_expiry_ms: 7 * DAY_MS,
            governance_expiry_ms: DAY_MS,
            tick_interval_ms: 15_000,
            size_bound: 1000,
            vote_retry_attempts: 10,
            vote_retry_delay_ms: 5_000,
            vote_buffer_limit: 256,
            bundle_queue: 256,
            removed_operator_policy: RemovedOperatorPolicy::Revalidate,
            authority: None,
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn gossip_config(&self, public_address: Option<String>, known_peers: Vec<String>) -> GossipConfig {
        GossipConfig {
            public_address,
            target_peers: self.target_peers,
            max_connections: self.max_connections,
            rate_limit: self.rate_limit,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_message_size: self.max_message_size,
            max_message_age: Duration::from_millis(self.max_message_age_ms),
            message_ttl: Duration::from_millis(self.message_ttl_ms),
            peer_check_interval: Duration::from_millis(self.peer_check_interval_ms),
            known_peers,
            ..GossipConfig::default()
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            refresh_interval: Duration::from_millis(self.registry_refresh_ms),
            operator_timeout: Duration::from_millis(self.operator_timeout_ms),
            ..RegistryConfig::default()
        }
    }

    pub fn engine_config(&self, kind: EngineKind) -> EngineConfig {
        let expiry_ms = match kind {
            EngineKind::Mint => self.mint_expiry_ms,
            EngineKind::Redemption => self.redemption_expiry_ms,
            EngineKind::Governance => self.governance_expiry_ms,
        };
        EngineConfig {
            expiry: Duration::from_millis(expiry_ms),
            size_bound: self.size_bound,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            vote_retry: RetryPolicy {
                max_attempts: self.vote_retry_attempts,
                delay: Duration::from_millis(self.vote_retry_delay_ms),
            },
            vote_buffer_limit: self.vote_buffer_limit,
            bundle_queue: self.bundle_queue,
            removed_operator_policy: self.removed_operator_policy,
            ..EngineConfig::for_kind(kind)
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"targetPeers": 8, "removedOperatorPolicy": "retain"}"#).unwrap();
        assert_eq!(config.target_peers, 8);
        assert_eq!(config.removed_operator_policy, RemovedOperatorPolicy::Retain);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.governance_expiry_ms, DAY_MS);
    }

    #[test]
    fn test_engine_expiry_per_kind() {
        let config = NodeConfig::default();
        assert_eq!(
            config.engine_config(EngineKind::Governance).expiry,
            Duration::from_secs(24 * 60 * 60)
        );
        assert_eq!(
            config.engine_config(EngineKind::Mint).expiry,
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_gossip_config_carries_peers() {
        let gossip = NodeConfig::default()
            .gossip_config(Some("1.2.3.4:3018".to_string()), vec!["5.6.7.8:3018".to_string()]);
        assert_eq!(gossip.public_address.as_deref(), Some("1.2.3.4:3018"));
        assert_eq!(gossip.known_peers.len(), 1);
        assert_eq!(gossip.rate_limit, 20);
    }
}

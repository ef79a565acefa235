//! Operator registry
//!
//! The signer set and threshold recorded on the settlement chain are the only
//! source of truth for who may vote. The registry mirrors them, refreshing
//! periodically, and tracks liveness from verified heartbeats.

use crate::error::HeartbeatError;
use crate::heartbeat::verify_heartbeat;
use bridge_chain::{Authority, AuthoritySource, ChainError, ChainFamily, PublicKey, Signer};
use bridge_gossip::codec::now_ms;
use bridge_gossip::Heartbeat;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub refresh_interval: Duration,
    /// Grace after registration, and maximum silence before NOT_CONNECTED
    pub operator_timeout: Duration,
    pub heartbeat_max_age: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            operator_timeout: Duration::from_secs(30),
            heartbeat_max_age: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorStatus {
    Waiting,
    Connected,
    NotConnected,
}

#[derive(Debug, Clone)]
struct OperatorRecord {
    public_key: PublicKey,
    /// Destination chain address derived from `public_key`
    address: String,
    registered_at: u64,
    last_seen_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorView {
    pub username: String,
    pub public_key: PublicKey,
    pub address: String,
    pub status: OperatorStatus,
    pub last_seen_at: Option<u64>,
}

/// Result of applying a fresh authority
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub rekeyed: Vec<String>,
}

impl RegistryChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.rekeyed.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    threshold: usize,
    operators: BTreeMap<String, OperatorRecord>,
}

pub struct OperatorRegistry {
    config: RegistryConfig,
    source: Arc<dyn AuthoritySource>,
    state: RwLock<RegistryState>,
}

impl OperatorRegistry {
    pub fn new(config: RegistryConfig, source: Arc<dyn AuthoritySource>) -> Self {
        Self {
            config,
            source,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Diff `authority` against the current set
    pub fn apply_authority(&self, authority: &Authority, now: u64) -> RegistryChange {
        let mut change = RegistryChange::default();
        let mut state = self.state.write();

        let mut next = BTreeMap::new();
        for member in &authority.members {
            let address = match member.public_key.address() {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!("Skipping operator {}: {}", member.username, e);
                    continue;
                }
            };
            let record = match state.operators.remove(&member.username) {
                Some(mut existing) => {
                    if existing.public_key != member.public_key {
                        existing.public_key = member.public_key.clone();
                        existing.address = address;
                        change.rekeyed.push(member.username.clone());
                    }
                    existing
                }
                None => {
                    change.added.push(member.username.clone());
                    OperatorRecord {
                        public_key: member.public_key.clone(),
                        address,
                        registered_at: now,
                        last_seen_at: None,
                    }
                }
            };
            next.insert(member.username.clone(), record);
        }

        change.removed = state.operators.keys().cloned().collect();
        state.operators = next;

        if state.threshold != authority.threshold {
            tracing::info!(
                "Operator threshold {} -> {}",
                state.threshold,
                authority.threshold
            );
            state.threshold = authority.threshold;
        }
        if !change.is_empty() {
            tracing::info!(
                "Operators updated: +{:?} -{:?} rekeyed {:?}",
                change.added,
                change.removed,
                change.rekeyed
            );
        }
        change
    }

    /// Pull the authority from the settlement chain
    pub async fn refresh(&self) -> Result<RegistryChange, ChainError> {
        let authority = self.source.fetch_authority().await?;
        Ok(self.apply_authority(&authority, now_ms()))
    }

    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.refresh_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = registry.refresh().await {
                    tracing::warn!("Operator refresh failed, keeping previous set: {}", e);
                }
            }
        })
    }

    pub fn is_operator(&self, username: &str) -> bool {
        self.state.read().operators.contains_key(username)
    }

    pub fn operators(&self) -> Vec<String> {
        self.state.read().operators.keys().cloned().collect()
    }

    pub fn threshold(&self) -> usize {
        self.state.read().threshold
    }

    pub fn public_key(&self, username: &str) -> Option<PublicKey> {
        self.state
            .read()
            .operators
            .get(username)
            .map(|r| r.public_key.clone())
    }

    /// Identity `username`'s signatures must recover to on `family`
    pub fn expected_signer(&self, username: &str, family: ChainFamily) -> Option<Signer> {
        let state = self.state.read();
        let record = state.operators.get(username)?;
        Some(match family {
            ChainFamily::Hive => Signer::PublicKey(record.public_key.clone()),
            ChainFamily::Ethereum => Signer::Address(record.address.clone()),
        })
    }

    pub fn handle_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), HeartbeatError> {
        self.handle_heartbeat_at(heartbeat, now_ms())
    }

    pub fn handle_heartbeat_at(&self, heartbeat: &Heartbeat, now: u64) -> Result<(), HeartbeatError> {
        let key = self
            .public_key(&heartbeat.operator)
            .ok_or_else(|| HeartbeatError::UnknownOperator(heartbeat.operator.clone()))?;
        verify_heartbeat(
            heartbeat,
            &key,
            now,
            self.config.heartbeat_max_age.as_millis() as u64,
        )?;
        self.mark_seen(&heartbeat.operator, heartbeat.timestamp.min(now));
        tracing::trace!("Heartbeat from {}", heartbeat.operator);
        Ok(())
    }

    pub fn mark_seen(&self, username: &str, at: u64) {
        if let Some(record) = self.state.write().operators.get_mut(username) {
            let seen = record.last_seen_at.map_or(at, |prev| prev.max(at));
            record.last_seen_at = Some(seen);
        }
    }

    fn status_of(&self, record: &OperatorRecord, now: u64) -> OperatorStatus {
        let timeout = self.config.operator_timeout.as_millis() as u64;
        match record.last_seen_at {
            None if now.saturating_sub(record.registered_at) <= timeout => OperatorStatus::Waiting,
            None => OperatorStatus::NotConnected,
            Some(seen) if now.saturating_sub(seen) > timeout => OperatorStatus::NotConnected,
            Some(_) => OperatorStatus::Connected,
        }
    }

    pub fn status(&self, username: &str, now: u64) -> Option<OperatorStatus> {
        let state = self.state.read();
        state
            .operators
            .get(username)
            .map(|record| self.status_of(record, now))
    }

    pub fn views(&self, now: u64) -> Vec<OperatorView> {
        let state = self.state.read();
        state
            .operators
            .iter()
            .map(|(username, record)| OperatorView {
                username: username.clone(),
                public_key: record.public_key.clone(),
                address: record.address.clone(),
                status: self.status_of(record, now),
                last_seen_at: record.last_seen_at,
            })
            .collect()
    }

    pub fn connected_count(&self, now: u64) -> usize {
        let state = self.state.read();
        state
            .operators
            .values()
            .filter(|record| self.status_of(record, now) == OperatorStatus::Connected)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::sign_heartbeat;
    use bridge_chain::{AuthorityMember, ChainId, MemoryLedger, OperatorCredential};

    fn creds(names: &[&str]) -> Vec<OperatorCredential> {
        names
            .iter()
            .map(|n| OperatorCredential::generate(*n, &mut rand::thread_rng()))
            .collect()
    }

    fn authority(ops: &[OperatorCredential], threshold: usize) -> Authority {
        Authority {
            threshold,
            members: ops
                .iter()
                .map(|op| AuthorityMember {
                    username: op.username().to_string(),
                    public_key: op.public_key(),
                })
                .collect(),
        }
    }

    fn registry() -> OperatorRegistry {
        OperatorRegistry::new(
            RegistryConfig::default(),
            Arc::new(MemoryLedger::new(ChainId::Hive, "treasury")),
        )
    }

    #[test]
    fn test_apply_authority_diffs() {
        let ops = creds(&["alice", "bob", "carol"]);
        let reg = registry();

        let change = reg.apply_authority(&authority(&ops[..2], 2), 0);
        assert_eq!(change.added, vec!["alice", "bob"]);
        assert_eq!(reg.threshold(), 2);

        reg.mark_seen("alice", 5);
        let change = reg.apply_authority(&authority(&ops[1..], 2), 10);
        assert_eq!(change.added, vec!["carol"]);
        assert_eq!(change.removed, vec!["alice"]);
        assert!(!reg.is_operator("alice"));
        assert!(reg.expected_signer("alice", ChainFamily::Hive).is_none());
        assert_eq!(
            reg.expected_signer("bob", ChainFamily::Ethereum),
            Some(Signer::Address(ops[1].address()))
        );
    }

    #[test]
    fn test_status_transitions() {
        let ops = creds(&["alice"]);
        let reg = registry();
        reg.apply_authority(&authority(&ops, 1), 0);

        assert_eq!(reg.status("alice", 10_000), Some(OperatorStatus::Waiting));
        assert_eq!(reg.status("alice", 31_000), Some(OperatorStatus::NotConnected));

        reg.mark_seen("alice", 40_000);
        assert_eq!(reg.status("alice", 45_000), Some(OperatorStatus::Connected));
        assert_eq!(reg.connected_count(45_000), 1);
        assert_eq!(reg.status("alice", 71_000), Some(OperatorStatus::NotConnected));
        assert_eq!(reg.status("nobody", 0), None);
    }

    #[test]
    fn test_heartbeat_updates_last_seen() {
        let ops = creds(&["alice", "bob"]);
        let reg = registry();
        reg.apply_authority(&authority(&ops[..1], 1), 0);

        let hb = sign_heartbeat(&ops[0], "peer", 1_000).unwrap();
        reg.handle_heartbeat_at(&hb, 1_500).unwrap();
        assert_eq!(reg.status("alice", 2_000), Some(OperatorStatus::Connected));

        let stranger = sign_heartbeat(&ops[1], "peer", 1_000).unwrap();
        assert_eq!(
            reg.handle_heartbeat_at(&stranger, 1_500),
            Err(HeartbeatError::UnknownOperator("bob".to_string()))
        );
    }

    #[tokio::test]
    async fn test_refresh_from_source() {
        let ops = creds(&["alice", "bob"]);
        let ledger = Arc::new(MemoryLedger::new(ChainId::Hive, "treasury"));
        ledger.set_authority(authority(&ops, 2));
        let reg = OperatorRegistry::new(RegistryConfig::default(), ledger.clone());

        let change = reg.refresh().await.unwrap();
        assert_eq!(change.added.len(), 2);

        ledger.set_unreachable(true);
        assert!(reg.refresh().await.is_err());
        assert_eq!(reg.operators().len(), 2);
    }
}

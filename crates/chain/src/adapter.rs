//! Chain adapter interface
//!
//! Real RPC clients for the settlement and destination chains live outside
//! this workspace. They plug in by implementing `ChainAdapter` (and, for the
//! settlement chain, `AuthoritySource`).

use crate::crypto::{Digest, OperatorCredential, PublicKey, Signer};
use crate::error::ChainError;
use crate::types::{Action, ChainEvent, ChainId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One operator's signature over an action digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSignature {
    pub operator: String,
    pub signature: String,
}

/// Result of an idempotent submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Applied,
    /// Someone else got there first, treated as success
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityMember {
    pub username: String,
    pub public_key: PublicKey,
}

/// Signer set and threshold recorded on the settlement chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub threshold: usize,
    pub members: Vec<AuthorityMember>,
}

impl Authority {
    pub fn member(&self, username: &str) -> Option<&AuthorityMember> {
        self.members.iter().find(|m| m.username == username)
    }
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn id(&self) -> ChainId;

    /// Feed of normalized transfer and burn events
    fn subscribe(&self) -> broadcast::Receiver<ChainEvent>;

    async fn has_already_applied(&self, action: &Action) -> Result<bool, ChainError>;

    async fn compute_action_digest(&self, action: &Action) -> Result<Digest, ChainError>;

    fn sign(&self, credential: &OperatorCredential, digest: &Digest) -> Result<String, ChainError> {
        self.id().family().sign(credential, digest)
    }

    fn recover_signer(&self, digest: &Digest, signature: &str) -> Result<Signer, ChainError> {
        self.id().family().recover(digest, signature)
    }

    /// Live signature threshold, may change between calls
    async fn current_threshold(&self) -> Result<usize, ChainError>;

    /// Submit with collected signatures, must tolerate "already applied"
    async fn submit(
        &self,
        action: &Action,
        signatures: &[OperatorSignature],
    ) -> Result<SubmitOutcome, ChainError>;
}

#[async_trait]
pub trait AuthoritySource: Send + Sync {
    async fn fetch_authority(&self) -> Result<Authority, ChainError>;
}

/// Adapters selected by chain id
#[derive(Clone, Default)]
pub struct ChainSet {
    adapters: BTreeMap<ChainId, Arc<dyn ChainAdapter>>,
}

impl ChainSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn get(&self, chain: ChainId) -> Result<Arc<dyn ChainAdapter>, ChainError> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or_else(|| ChainError::Unsupported {
                chain,
                method: "adapter".to_string(),
            })
    }

    pub fn contains(&self, chain: ChainId) -> bool {
        self.adapters.contains_key(&chain)
    }

    pub fn ids(&self) -> Vec<ChainId> {
        self.adapters.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChainId, &Arc<dyn ChainAdapter>)> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

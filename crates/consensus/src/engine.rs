//! Threshold consensus engine
//!
//! One engine per action kind (mint, redemption, governance), identical in
//! structure. Entries are created only from observed chain events, collect
//! verified operator signatures keyed by content hash, and are submitted
//! once the chain's live threshold is met.
//!
//! Locking: the vote table sits behind one `parking_lot::RwLock`. Every
//! await (digest, threshold, submit, applied checks) happens with the lock
//! released; the `Submitting` status is the in-flight flag that keeps two
//! callers from submitting the same entry.

use crate::error::{ConsensusError, VoteRejection};
use crate::operators::OperatorRegistry;
use crate::pending::{PendingView, PendingVote, VoteStatus};
use crate::retry::{Attempt, RetryBuffer, RetryPolicy};
use crate::sink::GossipSink;
use bridge_chain::{
    Action, ChainAdapter, ChainId, ChainSet, GovernanceMethod, OperatorCredential, SubmitOutcome,
};
use bridge_gossip::codec::now_ms;
use bridge_gossip::{Message, SignatureBundle, SignatureRequest, SignedVote};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Mint,
    Redemption,
    Governance,
}

impl EngineKind {
    /// Table name used in logs and the status API
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Mint => "mint",
            EngineKind::Redemption => "redemption",
            EngineKind::Governance => "governance",
        }
    }

    /// Wrap `bundle` in this table's `*_SIGNATURES` message
    pub fn bundle_message(&self, bundle: SignatureBundle) -> Message {
        match self {
            EngineKind::Mint => Message::MintSignatures(bundle),
            EngineKind::Redemption => Message::RedemptionSignatures(bundle),
            EngineKind::Governance => Message::GovernanceSignatures(bundle),
        }
    }

    pub fn request_message(&self, key: String) -> Message {
        let request = SignatureRequest { key };
        match self {
            EngineKind::Mint => Message::RequestMintSignatures(request),
            EngineKind::Redemption => Message::RequestRedemptionSignatures(request),
            EngineKind::Governance => Message::RequestGovernanceSignatures(request),
        }
    }

    /// Value-bearing tables shed entries under size pressure
    pub fn evicts_under_pressure(&self) -> bool {
        !matches!(self, EngineKind::Governance)
    }
}

/// What happens to collected votes of an operator that leaves the set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovedOperatorPolicy {
    /// Keep votes cast while the operator was registered
    Retain,
    /// Re-check every vote against the current set on each quorum check
    #[default]
    Revalidate,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entries older than this are purged
    pub expiry: Duration,
    /// Table size above which mint/redemption entries are evicted
    pub size_bound: usize,
    pub tick_interval: Duration,
    /// Minimum gap between `REQUEST_*_SIGNATURES` for one entry
    pub request_interval: Duration,
    /// Retry rounds for votes that arrive before their entry
    pub vote_retry: RetryPolicy,
    /// Most early votes held at once; the oldest are evicted past this
    pub vote_buffer_limit: usize,
    /// Peer bundles waiting for the engine's worker; more are dropped
    pub bundle_queue: usize,
    /// How many extra times our own signature is re-gossiped
    pub self_gossip_limit: u32,
    pub removed_operator_policy: RemovedOperatorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry: DAY * 7,
            size_bound: 1000,
            tick_interval: Duration::from_secs(15),
            request_interval: Duration::from_secs(30),
            vote_retry: RetryPolicy::default(),
            vote_buffer_limit: 256,
            bundle_queue: 256,
            self_gossip_limit: 3,
            removed_operator_policy: RemovedOperatorPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults for `kind`; governance proposals expire after a day
    pub fn for_kind(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Governance => Self {
                expiry: DAY,
                ..Default::default()
            },
            _ => Self::default(),
        }
    }
}

/// Early votes, keyed by (entry key, operator), holding the signature
type VoteBuffer = RetryBuffer<(String, String), String>;

pub struct ThresholdEngine {
    kind: EngineKind,
    config: EngineConfig,
    chains: ChainSet,
    registry: Arc<OperatorRegistry>,
    sink: Arc<dyn GossipSink>,
    credential: Option<OperatorCredential>,
    entries: RwLock<HashMap<String, PendingVote>>,
    /// Locked before `entries` whenever both are held
    buffered: Mutex<VoteBuffer>,
    bundles: mpsc::Sender<SignatureBundle>,
    /// Taken by the bundle worker on `spawn`
    bundle_rx: Mutex<Option<mpsc::Receiver<SignatureBundle>>>,
}

impl ThresholdEngine {
    /// Build an engine. Without a `credential` it collects and submits
    /// peer votes but never signs. Call `spawn` to start its loops.
    pub fn new(
        kind: EngineKind,
        config: EngineConfig,
        chains: ChainSet,
        registry: Arc<OperatorRegistry>,
        sink: Arc<dyn GossipSink>,
        credential: Option<OperatorCredential>,
    ) -> Arc<Self> {
        let (bundles, bundle_rx) = mpsc::channel(config.bundle_queue.max(1));
        let buffered = RetryBuffer::new(config.vote_retry, config.vote_buffer_limit);
        Arc::new(Self {
            kind,
            config,
            chains,
            registry,
            sink,
            credential,
            entries: RwLock::new(HashMap::new()),
            buffered: Mutex::new(buffered),
            bundles,
            bundle_rx: Mutex::new(Some(bundle_rx)),
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn adapter(&self, chain: ChainId) -> Result<Arc<dyn ChainAdapter>, ConsensusError> {
        self.chains
            .get(chain)
            .map_err(|_| ConsensusError::UnknownChain(chain))
    }

    /// Our operator name, if we hold a credential for a registered operator
    fn signing_operator(&self) -> Option<&OperatorCredential> {
        self.credential
            .as_ref()
            .filter(|c| self.registry.is_operator(c.username()))
    }

    fn is_stale(&self, created_at: u64, now: u64) -> bool {
        now.saturating_sub(created_at) > self.config.expiry.as_millis() as u64
    }

    /// Track `action` and self-sign it when we are a registered operator
    pub async fn observe(&self, action: Action, observed_at: u64) -> Result<bool, ConsensusError> {
        self.observe_with(action, observed_at, true).await
    }

    /// Create the entry for `action`. Returns false when it already exists,
    /// is too old, or has already been applied on chain.
    pub async fn observe_with(
        &self,
        action: Action,
        observed_at: u64,
        self_sign: bool,
    ) -> Result<bool, ConsensusError> {
        let key = action.content_key();
        if self.entries.read().contains_key(&key) {
            return Ok(false);
        }
        if self.is_stale(observed_at, now_ms()) {
            tracing::debug!("Ignoring stale {} {}", self.kind.name(), key);
            return Ok(false);
        }

        let adapter = self.adapter(action.chain())?;
        if adapter.has_already_applied(&action).await? {
            tracing::debug!("{} {} already applied", self.kind.name(), key);
            return Ok(false);
        }
        let digest = adapter.compute_action_digest(&action).await?;

        {
            let mut entries = self.entries.write();
            if entries.contains_key(&key) {
                return Ok(false);
            }
            entries.insert(key.clone(), PendingVote::new(action, digest, observed_at));
        }
        tracing::info!("Observed {} {}", self.kind.name(), key);
        self.apply_buffered(&key);

        let signed = self_sign && self.sign_existing(&key).await?;
        if !signed {
            self.maybe_submit(&key).await?;
        }
        Ok(true)
    }

    /// Add our signature to an existing entry and gossip it
    pub async fn sign_existing(&self, key: &str) -> Result<bool, ConsensusError> {
        let Some(credential) = self.signing_operator() else {
            return Ok(false);
        };
        let (chain, digest) = {
            let entries = self.entries.read();
            let entry = entries
                .get(key)
                .ok_or_else(|| ConsensusError::UnknownEntry(key.to_string()))?;
            if entry.has_vote(credential.username()) || entry.status.is_terminal() {
                return Ok(false);
            }
            (entry.action.chain(), entry.digest)
        };

        let signature = self.adapter(chain)?.sign(credential, &digest)?;
        let bundle = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(key) else {
                return Ok(false);
            };
            if !entry.vote(credential.username(), &signature) {
                return Ok(false);
            }
            bundle_of(entry)
        };
        tracing::info!("Signed {} {}", self.kind.name(), key);
        self.sink.broadcast(self.kind.bundle_message(bundle));

        self.maybe_submit(key).await?;
        Ok(true)
    }

    /// Verify and record one remote vote.
    ///
    /// The signature must recover to the operator's registered key (Hive
    /// family) or address (Ethereum family) for the entry's chain. Never
    /// awaits and never holds the table lock during recovery. Does not
    /// submit; see `receive_vote`.
    pub fn vote(&self, key: &str, operator: &str, signature: &str) -> Result<(), VoteRejection> {
        let (chain, digest) = {
            let entries = self.entries.read();
            let entry = entries.get(key).ok_or(VoteRejection::MissingEntry)?;
            if entry.status.is_terminal() {
                return Err(VoteRejection::Closed);
            }
            if entry.has_vote(operator) {
                return Err(VoteRejection::Duplicate);
            }
            (entry.action.chain(), entry.digest)
        };

        let expected = self
            .registry
            .expected_signer(operator, chain.family())
            .ok_or(VoteRejection::UnknownOperator)?;
        let adapter = self.adapter(chain).map_err(|_| VoteRejection::UnsupportedChain)?;
        match adapter.recover_signer(&digest, signature) {
            Ok(recovered) if recovered == expected => {}
            _ => return Err(VoteRejection::BadSignature),
        }

        let mut entries = self.entries.write();
        let entry = entries.get_mut(key).ok_or(VoteRejection::MissingEntry)?;
        if !entry.vote(operator, signature) {
            return Err(VoteRejection::Duplicate);
        }
        tracing::debug!(
            "{} {}: vote from {} ({} total)",
            self.kind.name(),
            key,
            operator,
            entry.vote_count()
        );
        Ok(())
    }

    /// `vote`, then submit on quorum. A vote from a registered operator
    /// that arrives ahead of its entry waits in the bounded vote buffer.
    pub async fn receive_vote(&self, key: String, operator: String, signature: String) {
        match self.vote(&key, &operator, &signature) {
            Ok(()) => self.submit_logged(&key).await,
            Err(VoteRejection::MissingEntry) => self.buffer_vote(key, operator, signature),
            Err(VoteRejection::Duplicate) => {
                tracing::trace!("Duplicate {} vote from {} on {}", self.kind.name(), operator, key);
            }
            Err(VoteRejection::Closed) => {
                tracing::debug!("{} {} closed, dropping vote from {}", self.kind.name(), key, operator);
            }
            Err(e) => {
                tracing::warn!("Dropping {} vote from {} on {}: {}", self.kind.name(), operator, key, e);
            }
        }
    }

    fn buffer_vote(&self, key: String, operator: String, signature: String) {
        if !self.registry.is_operator(&operator) {
            tracing::debug!("Not buffering {} vote from non-operator {}", self.kind.name(), operator);
            return;
        }
        let mut buffered = self.buffered.lock();
        if buffered.push((key, operator), signature) {
            tracing::trace!("{} vote buffered ({} waiting)", self.kind.name(), buffered.len());
        }
    }

    /// Early votes currently waiting for their entry
    pub fn buffered_votes(&self) -> usize {
        self.buffered.lock().len()
    }

    /// Count buffered votes for a freshly created entry
    fn apply_buffered(&self, key: &str) -> usize {
        let waiting = self.buffered.lock().take_where(|(k, _)| k == key);
        let mut applied = 0;
        for ((key, operator), signature) in waiting {
            match self.vote(&key, &operator, &signature) {
                Ok(()) => applied += 1,
                Err(e) => tracing::debug!("Buffered vote from {} on {} rejected: {}", operator, key, e),
            }
        }
        applied
    }

    /// One retry round over the vote buffer; submits entries that gained votes
    pub async fn retry_buffered(&self) -> usize {
        let mut ready: Vec<String> = self
            .buffered
            .lock()
            .retry_round(|(key, operator), signature| match self.vote(key, operator, signature) {
                Err(VoteRejection::MissingEntry) => Attempt::Retry,
                Ok(()) => Attempt::Done(Some(key.clone())),
                Err(e) => {
                    tracing::debug!("Buffered vote from {} on {} rejected: {}", operator, key, e);
                    Attempt::Done(None)
                }
            })
            .into_iter()
            .flatten()
            .collect();
        ready.sort();
        ready.dedup();
        for key in &ready {
            self.submit_logged(key).await;
        }
        ready.len()
    }

    /// Count every vote in a peer's bundle, submitting on quorum. Awaits
    /// chain RPC; gossip dispatch goes through `enqueue_bundle` instead.
    pub async fn handle_bundle(&self, bundle: SignatureBundle) {
        for vote in bundle.votes {
            self.receive_vote(bundle.key.clone(), vote.operator, vote.signature)
                .await;
        }
    }

    /// Hand a peer's bundle to this engine's worker without waiting.
    /// Returns false when the queue is full and the bundle was dropped.
    pub fn enqueue_bundle(&self, bundle: SignatureBundle) -> bool {
        match self.bundles.try_send(bundle) {
            Ok(()) => true,
            Err(TrySendError::Full(bundle)) => {
                tracing::warn!("{} bundle queue full, dropping {}", self.kind.name(), bundle.key);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Peer bundles waiting for the worker
    pub fn queued_bundles(&self) -> usize {
        self.bundles.max_capacity() - self.bundles.capacity()
    }

    /// Answer a peer's `REQUEST_*_SIGNATURES` with what we hold
    pub fn handle_request(&self, sender: &str, request: &SignatureRequest) -> bool {
        let bundle = match self.entries.read().get(&request.key) {
            Some(entry) if entry.vote_count() > 0 => bundle_of(entry),
            _ => return false,
        };
        self.sink.send_to(sender, self.kind.bundle_message(bundle))
    }

    async fn submit_logged(&self, key: &str) {
        if let Err(e) = self.maybe_submit(key).await {
            tracing::warn!("{} {} submission failed: {}", self.kind.name(), key, e);
        }
    }

    /// Submit `key` if it has quorum against the live threshold and no
    /// submission is already in flight or done.
    pub async fn maybe_submit(&self, key: &str) -> Result<Option<SubmitOutcome>, ConsensusError> {
        let chain = match self.entries.read().get(key) {
            Some(entry) if !entry.status.is_submitted_or_later() => entry.action.chain(),
            _ => return Ok(None),
        };
        let adapter = self.adapter(chain)?;
        let threshold = adapter.current_threshold().await?;

        let (action, signatures) = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(key) else {
                return Ok(None);
            };
            if entry.status.is_submitted_or_later() {
                return Ok(None);
            }
            if self.config.removed_operator_policy == RemovedOperatorPolicy::Revalidate {
                self.revalidate_entry(entry, adapter.as_ref());
            }
            entry.update_status(threshold);
            if !entry.has_quorum(threshold) {
                return Ok(None);
            }
            entry.status = VoteStatus::Submitting;
            (entry.action.clone(), entry.signatures())
        };

        tracing::info!(
            "Submitting {} {} with {}/{} signatures",
            self.kind.name(),
            key,
            signatures.len(),
            threshold
        );
        let result = adapter.submit(&action, &signatures).await;

        let mut entries = self.entries.write();
        match result {
            Ok(outcome) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.status = VoteStatus::Submitted;
                }
                tracing::info!("{} {} submitted: {:?}", self.kind.name(), key, outcome);
                Ok(Some(outcome))
            }
            Err(e) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.status = VoteStatus::QuorumReached;
                }
                Err(e.into())
            }
        }
    }

    /// Open governance proposal for `(chain, method, target)`, newest first
    pub fn find_open(&self, chain: ChainId, method: GovernanceMethod, target: &str) -> Option<String> {
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.status.is_submitted_or_later())
            .filter_map(|entry| match &entry.action {
                Action::Governance(p)
                    if p.chain == chain && p.method == method && p.target == target =>
                {
                    Some((p.block_num, entry.key.clone()))
                }
                _ => None,
            })
            .max()
            .map(|(_, key)| key)
    }

    /// Snapshot of one entry
    pub fn get(&self, key: &str) -> Option<PendingView> {
        self.entries.read().get(key).map(PendingView::from)
    }

    /// Every entry, oldest first
    pub fn views(&self) -> Vec<PendingView> {
        let mut views: Vec<PendingView> = self.entries.read().values().map(PendingView::from).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        views
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// `tick_at` the current wall clock
    pub async fn tick(&self) {
        self.tick_at(now_ms()).await
    }

    /// One maintenance pass at time `now` (ms).
    ///
    /// In order: drop entries the chain reports applied, expire old ones,
    /// shed value-bearing entries over the size bound, recheck votes of
    /// departed operators, retry submission of every open entry, then ask
    /// peers for missing signatures.
    pub async fn tick_at(&self, now: u64) {
        self.confirm_applied().await;
        self.expire(now);
        if self.kind.evicts_under_pressure() {
            self.evict_surplus();
        }
        if self.config.removed_operator_policy == RemovedOperatorPolicy::Revalidate {
            self.revalidate();
        }

        let open: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|entry| !entry.status.is_submitted_or_later())
            .map(|entry| entry.key.clone())
            .collect();
        for key in &open {
            self.submit_logged(key).await;
        }

        self.nudge(now);
    }

    /// Drop entries the chain reports as applied
    async fn confirm_applied(&self) {
        let snapshot: Vec<(String, Action)> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.status != VoteStatus::Submitting)
            .map(|entry| (entry.key.clone(), entry.action.clone()))
            .collect();

        for (key, action) in snapshot {
            let Ok(adapter) = self.adapter(action.chain()) else {
                continue;
            };
            match adapter.has_already_applied(&action).await {
                Ok(true) => {
                    let mut entries = self.entries.write();
                    if let Some(mut entry) = entries.remove(&key) {
                        entry.status = VoteStatus::Confirmed;
                        tracing::info!("{} {} confirmed", self.kind.name(), key);
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!("Could not check {} {}: {}", self.kind.name(), key, e);
                }
            }
        }
    }

    fn expire(&self, now: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, entry| {
            if entry.status == VoteStatus::Submitting || !self.is_stale(entry.created_at, now) {
                return true;
            }
            entry.status = VoteStatus::Expired;
            tracing::info!("{} {} expired with {} votes", self.kind.name(), key, entry.vote_count());
            false
        });
        before - entries.len()
    }

    /// Over the size bound, drop unsubmitted entries smallest value first,
    /// oldest first among equals
    fn evict_surplus(&self) -> usize {
        let mut entries = self.entries.write();
        let surplus = entries.len().saturating_sub(self.config.size_bound);
        if surplus == 0 {
            return 0;
        }
        let mut candidates: Vec<(u64, u64, String)> = entries
            .values()
            .filter(|entry| !entry.status.is_submitted_or_later())
            .map(|entry| (entry.action.value(), entry.created_at, entry.key.clone()))
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, _, key) in candidates.into_iter().take(surplus) {
            if entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        tracing::warn!(
            "{} table over {} entries, evicted {}",
            self.kind.name(),
            self.config.size_bound,
            evicted
        );
        evicted
    }

    /// Drop votes that no longer recover to a registered operator
    fn revalidate(&self) -> usize {
        let mut entries = self.entries.write();
        let mut dropped = 0;
        for entry in entries.values_mut() {
            if entry.status.is_submitted_or_later() {
                continue;
            }
            let Ok(adapter) = self.adapter(entry.action.chain()) else {
                continue;
            };
            dropped += self.revalidate_entry(entry, adapter.as_ref());
        }
        dropped
    }

    fn revalidate_entry(&self, entry: &mut PendingVote, adapter: &dyn ChainAdapter) -> usize {
        let family = entry.action.chain().family();
        let digest = entry.digest;
        let removed = entry.retain_votes(|operator, signature| {
            match self.registry.expected_signer(operator, family) {
                Some(expected) => adapter
                    .recover_signer(&digest, signature)
                    .map(|recovered| recovered == expected)
                    .unwrap_or(false),
                None => false,
            }
        });
        if removed > 0 {
            tracing::info!(
                "{} {}: dropped {} votes from departed operators",
                self.kind.name(),
                entry.key,
                removed
            );
            if entry.vote_count() == 0 {
                entry.status = VoteStatus::Observed;
            }
        }
        removed
    }

    /// Ask peers for signatures and re-gossip our own on a bounded schedule
    fn nudge(&self, now: u64) {
        let me = self.signing_operator().map(|c| c.username().to_string());
        let request_interval = self.config.request_interval.as_millis() as u64;
        let mut outgoing = Vec::new();
        {
            let mut entries = self.entries.write();
            for entry in entries.values_mut() {
                if entry.status.is_submitted_or_later() || entry.status == VoteStatus::QuorumReached {
                    continue;
                }
                if now.saturating_sub(entry.last_request_at) >= request_interval {
                    entry.last_request_at = now;
                    outgoing.push(self.kind.request_message(entry.key.clone()));
                }
                let holds_own = me.as_deref().is_some_and(|op| entry.has_vote(op));
                if holds_own && entry.self_gossips < self.config.self_gossip_limit {
                    entry.self_gossips += 1;
                    outgoing.push(self.kind.bundle_message(bundle_of(entry)));
                }
            }
        }
        for message in outgoing {
            self.sink.broadcast(message);
        }
    }

    /// Start the engine's loops: the maintenance tick, vote buffer
    /// retries, and the worker that drains queued peer bundles.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let engine = self.clone();
        let mut tasks = vec![tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.tick_interval);
            loop {
                ticker.tick().await;
                engine.tick().await;
            }
        })];

        let engine = self.clone();
        tasks.push(tokio::spawn(async move {
            let period = engine.config.vote_retry.delay.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                engine.retry_buffered().await;
            }
        }));

        match self.bundle_rx.lock().take() {
            Some(mut bundles) => {
                let engine = self.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(bundle) = bundles.recv().await {
                        engine.handle_bundle(bundle).await;
                    }
                }));
            }
            None => tracing::warn!("{} bundle worker already running", self.kind.name()),
        }
        tasks
    }
}

fn bundle_of(entry: &PendingVote) -> SignatureBundle {
    SignatureBundle {
        key: entry.key.clone(),
        votes: entry
            .signatures()
            .into_iter()
            .map(|s| SignedVote {
                operator: s.operator,
                signature: s.signature,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::RegistryConfig;
    use crate::sink::RecordingSink;
    use bridge_chain::{
        Authority, AuthorityMember, MemoryLedger, MintRequest, RedemptionRequest, Symbol,
    };

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        sink: Arc<RecordingSink>,
        engine: Arc<ThresholdEngine>,
        ops: Vec<OperatorCredential>,
    }

    fn fixture(threshold: usize, credential: Option<usize>) -> Fixture {
        let ops: Vec<_> = ["alice", "bob", "carol"]
            .iter()
            .map(|n| OperatorCredential::generate(*n, &mut rand::thread_rng()))
            .collect();
        let authority = Authority {
            threshold,
            members: ops
                .iter()
                .map(|op| AuthorityMember {
                    username: op.username().to_string(),
                    public_key: op.public_key(),
                })
                .collect(),
        };
        let ledger = Arc::new(MemoryLedger::new(ChainId::Hive, "treasury").with_authority(authority.clone()));
        let registry = Arc::new(OperatorRegistry::new(RegistryConfig::default(), ledger.clone()));
        registry.apply_authority(&authority, 0);
        let sink = Arc::new(RecordingSink::new());
        let engine = ThresholdEngine::new(
            EngineKind::Redemption,
            EngineConfig::for_kind(EngineKind::Redemption),
            ChainSet::new().with(ledger.clone()),
            registry,
            sink.clone(),
            credential.map(|i| ops[i].clone()),
        );
        Fixture {
            ledger,
            sink,
            engine,
            ops,
        }
    }

    fn redemption(hash: &str, amount: u64) -> Action {
        Action::Redemption(RedemptionRequest {
            source_chain: ChainId::EthHive,
            trx_hash: hash.to_string(),
            username: "dave".to_string(),
            amount,
            symbol: Symbol::Hive,
            block_num: 1,
        })
    }

    fn sign(f: &Fixture, i: usize, key: &str) -> String {
        let digest = f.engine.entries.read()[key].digest;
        ChainId::Hive.family().sign(&f.ops[i], &digest).unwrap()
    }

    #[tokio::test]
    async fn test_observe_self_signs_and_gossips() {
        let f = fixture(2, Some(0));
        let action = redemption("0x01", 1000);
        let key = action.content_key();

        assert!(f.engine.observe(action.clone(), now_ms()).await.unwrap());
        assert!(!f.engine.observe(action, now_ms()).await.unwrap());

        let view = f.engine.get(&key).unwrap();
        assert_eq!(view.operators, vec!["alice".to_string()]);
        assert_eq!(view.status, VoteStatus::Voting);
        assert!(matches!(
            f.sink.broadcasts().as_slice(),
            [Message::RedemptionSignatures(b)] if b.key == key
        ));
    }

    #[tokio::test]
    async fn test_applied_action_is_not_tracked() {
        let f = fixture(2, None);
        let action = redemption("0x02", 1000);
        f.ledger.mark_applied(&action);
        assert!(!f.engine.observe(action, now_ms()).await.unwrap());
        assert!(f.engine.is_empty());
    }

    #[tokio::test]
    async fn test_vote_rejections() {
        let f = fixture(3, None);
        let action = redemption("0x03", 1000);
        let key = action.content_key();
        f.engine.observe(action, now_ms()).await.unwrap();

        let alice = sign(&f, 0, &key);
        assert_eq!(f.engine.vote(&key, "alice", &alice), Ok(()));
        assert_eq!(f.engine.vote(&key, "alice", &alice), Err(VoteRejection::Duplicate));
        assert_eq!(f.engine.vote(&key, "mallory", &alice), Err(VoteRejection::UnknownOperator));
        assert_eq!(f.engine.vote(&key, "bob", &alice), Err(VoteRejection::BadSignature));
        assert_eq!(f.engine.vote("nope", "bob", &alice), Err(VoteRejection::MissingEntry));
        assert_eq!(f.engine.get(&key).unwrap().operators.len(), 1);
    }

    #[tokio::test]
    async fn test_vote_for_chain_without_adapter() {
        let f = fixture(2, None);
        let action = Action::Mint(MintRequest {
            chain: ChainId::EthHbd,
            recipient: "0x00000000000000000000000000000000000000aa".to_string(),
            amount: 1000,
            trx_id: "t1".to_string(),
            op_in_trx: 0,
            username: "dave".to_string(),
            block_num: 1,
        });
        let key = action.content_key();
        f.engine
            .entries
            .write()
            .insert(key.clone(), PendingVote::new(action, [7u8; 32], now_ms()));

        assert_eq!(f.engine.vote(&key, "alice", "00"), Err(VoteRejection::UnsupportedChain));
        f.engine
            .receive_vote(key.clone(), "alice".to_string(), "00".to_string())
            .await;
        assert_eq!(f.engine.buffered_votes(), 0);
        assert!(f.engine.get(&key).unwrap().operators.is_empty());
    }

    #[tokio::test]
    async fn test_failed_submit_is_retried_on_tick() {
        let f = fixture(1, None);
        let action = redemption("0x04", 1000);
        let key = action.content_key();
        f.engine.observe(action, now_ms()).await.unwrap();

        f.engine.vote(&key, "bob", &sign(&f, 1, &key)).unwrap();
        f.ledger.set_unreachable(true);
        assert!(f.engine.maybe_submit(&key).await.is_err());
        assert!(!f.engine.get(&key).unwrap().status.is_submitted_or_later());

        f.ledger.set_unreachable(false);
        f.engine.tick().await;
        assert_eq!(f.engine.get(&key).unwrap().status, VoteStatus::Submitted);

        f.engine.tick().await;
        assert!(f.engine.get(&key).is_none());
        assert_eq!(f.ledger.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_size_pressure_evicts_smallest_then_oldest() {
        let f = fixture(3, None);
        let engine = ThresholdEngine::new(
            EngineKind::Redemption,
            EngineConfig {
                size_bound: 2,
                ..EngineConfig::default()
            },
            ChainSet::new().with(f.ledger.clone()),
            f.engine.registry.clone(),
            f.sink.clone(),
            None,
        );
        let now = now_ms();
        engine.observe(redemption("0xa", 500), now - 2).await.unwrap();
        engine.observe(redemption("0xb", 500), now - 1).await.unwrap();
        engine.observe(redemption("0xc", 9000), now - 3).await.unwrap();

        engine.tick_at(now).await;
        let keys: Vec<String> = engine.views().into_iter().map(|v| v.key).collect();
        assert_eq!(keys, vec!["ETHHIVE:0xc".to_string(), "ETHHIVE:0xb".to_string()]);
    }

    #[tokio::test]
    async fn test_request_answered_with_bundle() {
        let f = fixture(2, Some(0));
        let action = redemption("0x05", 1000);
        let key = action.content_key();
        f.engine.observe(action, now_ms()).await.unwrap();
        f.sink.take();

        assert!(f.engine.handle_request("peer-9", &SignatureRequest { key: key.clone() }));
        assert!(!f.engine.handle_request("peer-9", &SignatureRequest { key: "other".into() }));
        let sent = f.sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_deref(), Some("peer-9"));
    }

    #[tokio::test]
    async fn test_nudge_requests_and_bounded_self_gossip() {
        let f = fixture(3, Some(0));
        let engine = ThresholdEngine::new(
            EngineKind::Redemption,
            EngineConfig {
                self_gossip_limit: 2,
                ..EngineConfig::default()
            },
            ChainSet::new().with(f.ledger.clone()),
            f.engine.registry.clone(),
            f.sink.clone(),
            Some(f.ops[0].clone()),
        );
        let now = now_ms();
        engine.observe(redemption("0x06", 1000), now).await.unwrap();
        f.sink.take();

        for i in 0..4u64 {
            engine.tick_at(now + i * 60_000).await;
        }
        let sent = f.sink.take();
        let requests = sent
            .iter()
            .filter(|(_, m)| matches!(m, Message::RequestRedemptionSignatures(_)))
            .count();
        let bundles = sent
            .iter()
            .filter(|(_, m)| matches!(m, Message::RedemptionSignatures(_)))
            .count();
        assert_eq!(requests, 4);
        assert_eq!(bundles, 2);
    }
}

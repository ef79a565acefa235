//! In-process ledger
//!
//! Implements both adapter traits against in-memory state so a local
//! operator network (and the test suites) can run without chain RPC.
//! Submissions are checked the way a real multisig would check them:
//! signatures must recover to distinct authority members and reach the
//! current threshold.

use crate::adapter::{
    Authority, AuthorityMember, AuthoritySource, ChainAdapter, OperatorSignature, SubmitOutcome,
};
use crate::crypto::{Digest, PublicKey};
use crate::digest::action_digest;
use crate::error::ChainError;
use crate::types::{Action, ChainEvent, ChainId, GovernanceMethod, GovernanceProposal};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;

/// An accepted submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub action: Action,
    pub signatures: Vec<OperatorSignature>,
}

#[derive(Default)]
struct LedgerState {
    authority: Authority,
    /// Known accounts, looked up when a signer is added
    accounts: HashMap<String, PublicKey>,
    applied: HashSet<String>,
    submissions: Vec<Submission>,
    submit_calls: usize,
    paused: bool,
    unreachable: bool,
}

pub struct MemoryLedger {
    id: ChainId,
    /// Treasury account or token contract the ledger executes against
    account: String,
    state: RwLock<LedgerState>,
    events: broadcast::Sender<ChainEvent>,
}

impl MemoryLedger {
    pub fn new(id: ChainId, account: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            id,
            account: account.into(),
            state: RwLock::new(LedgerState::default()),
            events,
        }
    }

    pub fn with_authority(self, authority: Authority) -> Self {
        self.set_authority(authority);
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn set_authority(&self, authority: Authority) {
        let mut state = self.state.write();
        for member in &authority.members {
            state
                .accounts
                .insert(member.username.clone(), member.public_key.clone());
        }
        state.authority = authority;
    }

    pub fn authority(&self) -> Authority {
        self.state.read().authority.clone()
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.state.write().authority.threshold = threshold;
    }

    pub fn register_account(&self, username: impl Into<String>, key: PublicKey) {
        self.state.write().accounts.insert(username.into(), key);
    }

    /// Record an action as applied without going through `submit`
    pub fn mark_applied(&self, action: &Action) {
        self.state.write().applied.insert(action.content_key());
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.read().submissions.clone()
    }

    /// Calls to `submit`, including rejected and duplicate ones
    pub fn submit_call_count(&self) -> usize {
        self.state.read().submit_calls
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    /// Make every RPC-backed call fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unreachable = unreachable;
    }

    /// Push an event to subscribers, returns the number of receivers
    pub fn emit(&self, event: ChainEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    fn check_reachable(&self) -> Result<(), ChainError> {
        if self.state.read().unreachable {
            return Err(ChainError::Rpc(format!("{} ledger unreachable", self.id)));
        }
        Ok(())
    }

    fn apply_governance(
        &self,
        state: &mut LedgerState,
        proposal: &GovernanceProposal,
    ) -> Result<(), ChainError> {
        match proposal.method {
            GovernanceMethod::AddSigner => {
                let key = state
                    .accounts
                    .get(&proposal.target)
                    .cloned()
                    .ok_or_else(|| ChainError::UnknownAccount(proposal.target.clone()))?;
                if state.authority.member(&proposal.target).is_none() {
                    state.authority.members.push(AuthorityMember {
                        username: proposal.target.clone(),
                        public_key: key,
                    });
                }
            }
            GovernanceMethod::RemoveSigner => {
                state
                    .authority
                    .members
                    .retain(|m| m.username != proposal.target);
            }
            GovernanceMethod::UpdateThreshold => {
                let threshold = proposal.target.parse::<usize>().map_err(|_| {
                    ChainError::Rejected(format!("bad threshold {}", proposal.target))
                })?;
                state.authority.threshold = threshold;
            }
            GovernanceMethod::Pause => state.paused = true,
            GovernanceMethod::Unpause => state.paused = false,
        }
        tracing::info!(
            "{} applied governance {} {}",
            self.id,
            proposal.method,
            proposal.target
        );
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for MemoryLedger {
    fn id(&self) -> ChainId {
        self.id
    }

    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    async fn has_already_applied(&self, action: &Action) -> Result<bool, ChainError> {
        self.check_reachable()?;
        Ok(self.state.read().applied.contains(&action.content_key()))
    }

    async fn compute_action_digest(&self, action: &Action) -> Result<Digest, ChainError> {
        action_digest(action, &self.account)
    }

    async fn current_threshold(&self) -> Result<usize, ChainError> {
        self.check_reachable()?;
        Ok(self.state.read().authority.threshold)
    }

    async fn submit(
        &self,
        action: &Action,
        signatures: &[OperatorSignature],
    ) -> Result<SubmitOutcome, ChainError> {
        let digest = action_digest(action, &self.account)?;
        let family = self.id.family();

        let mut state = self.state.write();
        state.submit_calls += 1;

        if state.unreachable {
            return Err(ChainError::Rpc(format!("{} ledger unreachable", self.id)));
        }
        if action.chain() != self.id {
            return Err(ChainError::Unsupported {
                chain: self.id,
                method: action.content_key(),
            });
        }

        let key = action.content_key();
        if state.applied.contains(&key) {
            return Ok(SubmitOutcome::AlreadyApplied);
        }
        if state.paused && !matches!(action, Action::Governance(_)) {
            return Err(ChainError::Rejected(format!("{} is paused", self.id)));
        }

        let mut signers = HashSet::new();
        for sig in signatures {
            let Some(member) = state.authority.member(&sig.operator) else {
                continue;
            };
            let expected = family.expected_signer(&member.public_key)?;
            if matches!(family.recover(&digest, &sig.signature), Ok(ref s) if *s == expected) {
                signers.insert(member.username.clone());
            }
        }
        if signers.len() < state.authority.threshold {
            return Err(ChainError::Rejected(format!(
                "{} valid signatures, threshold {}",
                signers.len(),
                state.authority.threshold
            )));
        }

        if let Action::Governance(proposal) = action {
            self.apply_governance(&mut state, proposal)?;
        }
        state.applied.insert(key);
        state.submissions.push(Submission {
            action: action.clone(),
            signatures: signatures.to_vec(),
        });
        Ok(SubmitOutcome::Applied)
    }
}

#[async_trait]
impl AuthoritySource for MemoryLedger {
    async fn fetch_authority(&self) -> Result<Authority, ChainError> {
        self.check_reachable()?;
        Ok(self.state.read().authority.clone())
    }
}

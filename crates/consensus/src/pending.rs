//! Pending vote entries

use bridge_chain::{Action, Digest, OperatorSignature};
use serde::Serialize;
use std::collections::BTreeMap;

/// Lifecycle of a pending entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteStatus {
    Observed,
    Voting,
    QuorumReached,
    /// Submission in flight
    Submitting,
    Submitted,
    Confirmed,
    Expired,
}

impl VoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VoteStatus::Confirmed | VoteStatus::Expired)
    }

    /// No new submission may start from this state
    pub fn is_submitted_or_later(&self) -> bool {
        matches!(
            self,
            VoteStatus::Submitting
                | VoteStatus::Submitted
                | VoteStatus::Confirmed
                | VoteStatus::Expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct PendingVote {
    pub key: String,
    pub action: Action,
    pub digest: Digest,
    /// operator -> signature, one per operator
    votes: BTreeMap<String, String>,
    /// Source event time (ms)
    pub created_at: u64,
    pub status: VoteStatus,
    /// Times our own signature was gossiped
    pub self_gossips: u32,
    /// Last `REQUEST_*_SIGNATURES` we sent for this entry (ms)
    pub last_request_at: u64,
}

impl PendingVote {
    pub fn new(action: Action, digest: Digest, created_at: u64) -> Self {
        Self {
            key: action.content_key(),
            action,
            digest,
            votes: BTreeMap::new(),
            created_at,
            status: VoteStatus::Observed,
            self_gossips: 0,
            last_request_at: 0,
        }
    }

    /// Idempotent: a second vote from the same operator changes nothing
    pub fn vote(&mut self, operator: &str, signature: &str) -> bool {
        if self.votes.contains_key(operator) {
            return false;
        }
        self.votes
            .insert(operator.to_string(), signature.to_string());
        if self.status == VoteStatus::Observed {
            self.status = VoteStatus::Voting;
        }
        true
    }

    pub fn has_vote(&self, operator: &str) -> bool {
        self.votes.contains_key(operator)
    }

    pub fn signature_of(&self, operator: &str) -> Option<&str> {
        self.votes.get(operator).map(String::as_str)
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Evaluated against the threshold at call time, never cached
    pub fn has_quorum(&self, threshold: usize) -> bool {
        threshold > 0 && self.votes.len() >= threshold
    }

    pub fn operators(&self) -> Vec<String> {
        self.votes.keys().cloned().collect()
    }

    pub fn signatures(&self) -> Vec<OperatorSignature> {
        self.votes
            .iter()
            .map(|(operator, signature)| OperatorSignature {
                operator: operator.clone(),
                signature: signature.clone(),
            })
            .collect()
    }

    /// Drop votes failing `keep`, returns how many were dropped
    pub fn retain_votes(&mut self, mut keep: impl FnMut(&str, &str) -> bool) -> usize {
        let before = self.votes.len();
        self.votes.retain(|operator, signature| keep(operator, signature));
        before - self.votes.len()
    }

    /// Refresh Voting / QuorumReached against the live threshold
    pub fn update_status(&mut self, threshold: usize) {
        if self.status.is_submitted_or_later() || self.votes.is_empty() {
            return;
        }
        self.status = if self.has_quorum(threshold) {
            VoteStatus::QuorumReached
        } else {
            VoteStatus::Voting
        };
    }
}

/// Read-only view of an entry
#[derive(Debug, Clone, Serialize)]
pub struct PendingView {
    pub key: String,
    pub action: Action,
    pub status: VoteStatus,
    pub operators: Vec<String>,
    pub signatures: Vec<OperatorSignature>,
    pub created_at: u64,
}

impl From<&PendingVote> for PendingView {
    fn from(entry: &PendingVote) -> Self {
        Self {
            key: entry.key.clone(),
            action: entry.action.clone(),
            status: entry.status,
            operators: entry.operators(),
            signatures: entry.signatures(),
            created_at: entry.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_chain::{ChainId, RedemptionRequest, Symbol};

    fn entry() -> PendingVote {
        let action = Action::Redemption(RedemptionRequest {
            source_chain: ChainId::EthHive,
            trx_hash: "0x01".to_string(),
            username: "dave".to_string(),
            amount: 1000,
            symbol: Symbol::Hive,
            block_num: 1,
        });
        PendingVote::new(action, [0u8; 32], 0)
    }

    #[test]
    fn test_double_vote_never_counts_twice() {
        let mut e = entry();
        assert!(e.vote("alice", "sig-a"));
        assert!(!e.vote("alice", "sig-a2"));
        assert_eq!(e.vote_count(), 1);
        assert_eq!(e.signature_of("alice"), Some("sig-a"));
        assert_eq!(e.status, VoteStatus::Voting);
    }

    #[test]
    fn test_quorum_follows_live_threshold() {
        let mut e = entry();
        e.vote("alice", "a");
        e.vote("bob", "b");

        assert!(e.has_quorum(2));
        assert!(!e.has_quorum(3));
        assert!(!e.has_quorum(0));

        e.update_status(2);
        assert_eq!(e.status, VoteStatus::QuorumReached);
        e.update_status(3);
        assert_eq!(e.status, VoteStatus::Voting);
    }

    #[test]
    fn test_retain_votes() {
        let mut e = entry();
        e.vote("alice", "a");
        e.vote("bob", "b");
        assert_eq!(e.retain_votes(|op, _| op != "bob"), 1);
        assert_eq!(e.operators(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_submitted_status_is_sticky() {
        let mut e = entry();
        e.vote("alice", "a");
        e.status = VoteStatus::Submitted;
        e.update_status(1);
        assert_eq!(e.status, VoteStatus::Submitted);
    }
}

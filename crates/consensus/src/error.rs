//! Consensus error types

use bridge_chain::{ChainError, ChainId};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("No adapter for chain {0}")]
    UnknownChain(ChainId),

    #[error("Entry {0} not found")]
    UnknownEntry(String),

    #[error("No settlement chain authority source configured")]
    NoAuthoritySource,
}

/// Why a vote was not counted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRejection {
    #[error("operator already voted")]
    Duplicate,

    #[error("operator is not registered")]
    UnknownOperator,

    #[error("signature does not recover to the operator")]
    BadSignature,

    #[error("no pending entry for key")]
    MissingEntry,

    #[error("entry's chain has no adapter")]
    UnsupportedChain,

    #[error("entry no longer accepts votes")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("heartbeat from unknown operator {0}")]
    UnknownOperator(String),

    #[error("heartbeat is {age_ms}ms old")]
    Stale { age_ms: u64 },

    #[error("heartbeat signature does not match {0}")]
    BadSignature(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceMemoError {
    #[error("not a governance memo")]
    NotGovernance,

    #[error("unknown governance action {0}")]
    UnknownAction(String),

    #[error("unknown governance method {0}")]
    UnknownMethod(String),

    #[error("invalid target {target} for {method}")]
    InvalidTarget { method: String, target: String },
}

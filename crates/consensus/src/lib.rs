//! Bridge Consensus - Operator registry and threshold-signature engines
//!
//! Architecture:
//! - The operator registry mirrors the chain-recorded signer set and threshold
//! - An event observer turns chain events into pending actions
//! - Three threshold engines (mint, redemption, governance) collect verified
//!   operator signatures over gossip and submit once quorum is reached
//! - The operator node wires all of it onto a gossip transport

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod node;
pub mod observer;
pub mod operators;
pub mod pending;
pub mod retry;
pub mod sink;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use engine::{EngineConfig, EngineKind, RemovedOperatorPolicy, ThresholdEngine};
pub use error::{ConsensusError, GovernanceMemoError, HeartbeatError, VoteRejection};
pub use heartbeat::HeartbeatService;
pub use node::{NodeStats, OperatorNode, OperatorNodeBuilder};
pub use observer::{parse_governance_memo, EventObserver, GovernanceMemo, GovernanceStep};
pub use operators::{OperatorRegistry, OperatorStatus, OperatorView, RegistryConfig};
pub use pending::{PendingView, VoteStatus};
pub use retry::RetryPolicy;
pub use sink::{GossipSink, RecordingSink};

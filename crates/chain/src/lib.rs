//! Bridge Chain - Chain adapter interface and shared bridge types
//!
//! Everything the operator node needs to know about the two ledgers:
//! - Chain identities and the signature scheme each one uses
//! - Normalized transfer / burn events pushed by adapters
//! - The three signable actions (mint, redemption, governance)
//! - secp256k1 operator credentials and signer recovery
//! - `MemoryLedger`, an in-process adapter for local networks and tests

pub mod adapter;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod memory;
pub mod types;

pub use adapter::{
    Authority, AuthorityMember, AuthoritySource, ChainAdapter, ChainSet, OperatorSignature,
    SubmitOutcome,
};
pub use crypto::{Digest, OperatorCredential, PublicKey, Signer};
pub use error::ChainError;
pub use memory::MemoryLedger;
pub use types::{
    Action, BurnEvent, ChainEvent, ChainFamily, ChainId, GovernanceMethod, GovernanceProposal,
    MintRequest, RedemptionRequest, Symbol, TransferEvent,
};

/// Amounts are carried as integers with three implied decimals ("1.000 HIVE" => 1000)
pub const AMOUNT_DECIMALS: u32 = 3;

/// Format an integer amount the way the settlement chain prints it
pub fn format_amount(amount: u64, symbol: Symbol) -> String {
    format!("{}.{:03} {}", amount / 1000, amount % 1000, symbol)
}

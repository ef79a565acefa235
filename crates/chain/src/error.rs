//! Chain adapter errors

use crate::types::ChainId;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("{method} is not supported on {chain}")]
    Unsupported { chain: ChainId, method: String },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Chain RPC error: {0}")]
    Rpc(String),

    #[error("Submission rejected: {0}")]
    Rejected(String),
}

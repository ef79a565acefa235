//! Action digests
//!
//! Every operator must derive byte-identical digests from the same action,
//! otherwise signatures never aggregate. Destination chain digests follow
//! Solidity `abi.encodePacked` layout; settlement chain digests hash the
//! compact JSON of the operation the treasury will broadcast.

use crate::crypto::{address_bytes, keccak256, sha256, Digest};
use crate::error::ChainError;
use crate::format_amount;
use crate::types::{Action, ChainFamily, GovernanceProposal, MintRequest, RedemptionRequest};
use serde_json::json;

fn push_uint256(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&[0u8; 24]);
    buf.extend_from_slice(&value.to_be_bytes());
}

/// keccak256(recipient ; uint256 amount ; trxId ; uint32 opInTrx ; contract)
///
/// The contract address is part of the preimage so a signature for one token
/// cannot be replayed on another.
pub fn mint_digest(request: &MintRequest, contract: &str) -> Result<Digest, ChainError> {
    let mut packed = Vec::with_capacity(20 + 32 + request.trx_id.len() + 4 + 20);
    packed.extend_from_slice(&address_bytes(&request.recipient)?);
    push_uint256(&mut packed, request.amount);
    packed.extend_from_slice(request.trx_id.as_bytes());
    packed.extend_from_slice(&request.op_in_trx.to_be_bytes());
    packed.extend_from_slice(&address_bytes(contract)?);
    Ok(keccak256(&packed))
}

/// sha256 of the treasury transfer paying out the redemption
pub fn redemption_digest(request: &RedemptionRequest, treasury: &str) -> Digest {
    let operation = json!({
        "type": "transfer",
        "from": treasury,
        "to": request.username,
        "amount": format_amount(request.amount, request.symbol),
        "memo": format!("{}:{}", request.source_chain, request.trx_hash),
    });
    sha256(operation.to_string().as_bytes())
}

pub fn governance_digest(
    proposal: &GovernanceProposal,
    account: &str,
) -> Result<Digest, ChainError> {
    match proposal.chain.family() {
        ChainFamily::Ethereum => {
            let mut packed = Vec::new();
            packed.extend_from_slice(proposal.method.as_str().as_bytes());
            packed.extend_from_slice(proposal.target.as_bytes());
            push_uint256(&mut packed, proposal.block_num);
            packed.extend_from_slice(&address_bytes(account)?);
            Ok(keccak256(&packed))
        }
        ChainFamily::Hive => {
            let operation = json!({
                "type": "account_update",
                "account": account,
                "method": proposal.method.as_str(),
                "target": proposal.target,
                "block_num": proposal.block_num,
            });
            Ok(sha256(operation.to_string().as_bytes()))
        }
    }
}

/// Digest of any action against the account or contract it executes on
pub fn action_digest(action: &Action, account: &str) -> Result<Digest, ChainError> {
    match action {
        Action::Mint(request) => mint_digest(request, account),
        Action::Redemption(request) => Ok(redemption_digest(request, account)),
        Action::Governance(proposal) => governance_digest(proposal, account),
    }
}

//! Chain identities, observed events and signable actions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A ledger the bridge settles on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainId {
    /// Settlement chain holding the treasury
    #[serde(rename = "HIVE")]
    Hive,
    /// Wrapped HIVE token on the destination chain
    #[serde(rename = "ETHHIVE")]
    EthHive,
    /// Wrapped HBD token on the destination chain
    #[serde(rename = "ETHHBD")]
    EthHbd,
}

impl ChainId {
    pub const ALL: [ChainId; 3] = [ChainId::Hive, ChainId::EthHive, ChainId::EthHbd];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Hive => "HIVE",
            ChainId::EthHive => "ETHHIVE",
            ChainId::EthHbd => "ETHHBD",
        }
    }

    /// Signature scheme family of this chain
    pub fn family(&self) -> ChainFamily {
        match self {
            ChainId::Hive => ChainFamily::Hive,
            ChainId::EthHive | ChainId::EthHbd => ChainFamily::Ethereum,
        }
    }

    /// Token a destination chain wraps
    pub fn wrapped_symbol(&self) -> Option<Symbol> {
        match self {
            ChainId::Hive => None,
            ChainId::EthHive => Some(Symbol::Hive),
            ChainId::EthHbd => Some(Symbol::Hbd),
        }
    }

    /// Destination chain of `family` wrapping `symbol`
    pub fn for_symbol(family: ChainFamily, symbol: Symbol) -> Option<ChainId> {
        match (family, symbol) {
            (ChainFamily::Ethereum, Symbol::Hive) => Some(ChainId::EthHive),
            (ChainFamily::Ethereum, Symbol::Hbd) => Some(ChainId::EthHbd),
            (ChainFamily::Hive, _) => None,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIVE" => Ok(ChainId::Hive),
            "ETHHIVE" => Ok(ChainId::EthHive),
            "ETHHBD" => Ok(ChainId::EthHbd),
            other => Err(format!("unknown chain: {}", other)),
        }
    }
}

/// Signature scheme family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    /// Signers identified by compressed public key
    Hive,
    /// Signers identified by address, EIP-191 prefixed digests
    Ethereum,
}

impl ChainFamily {
    /// Prefix used in transfer memos to name a destination family
    pub fn memo_prefix(&self) -> &'static str {
        match self {
            ChainFamily::Hive => "HIVE",
            ChainFamily::Ethereum => "ETH",
        }
    }

    pub fn from_memo_prefix(prefix: &str) -> Option<ChainFamily> {
        match prefix {
            "HIVE" => Some(ChainFamily::Hive),
            "ETH" => Some(ChainFamily::Ethereum),
            _ => None,
        }
    }
}

/// Settlement chain asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    #[serde(rename = "HIVE")]
    Hive,
    #[serde(rename = "HBD")]
    Hbd,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Hive => f.write_str("HIVE"),
            Symbol::Hbd => f.write_str("HBD"),
        }
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIVE" => Ok(Symbol::Hive),
            "HBD" => Ok(Symbol::Hbd),
            other => Err(format!("unknown symbol: {}", other)),
        }
    }
}

/// Transfer observed on the settlement chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    /// Milli-units (three implied decimals)
    pub amount: u64,
    pub symbol: Symbol,
    pub memo: String,
    pub trx_id: String,
    pub op_in_trx: u32,
    pub block_num: u64,
    /// Block timestamp (ms since epoch)
    pub timestamp: u64,
}

/// Burn of wrapped tokens observed on a destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    pub chain: ChainId,
    pub trx_hash: String,
    /// Settlement chain account to pay out
    pub username: String,
    pub amount: u64,
    pub block_num: u64,
    pub timestamp: u64,
}

/// Normalized event pushed by a chain adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainEvent {
    Transfer(TransferEvent),
    Burn(BurnEvent),
}

impl ChainEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            ChainEvent::Transfer(t) => t.timestamp,
            ChainEvent::Burn(b) => b.timestamp,
        }
    }
}

/// Mint of wrapped tokens for a treasury deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub chain: ChainId,
    /// Lowercase 0x address on the destination chain
    pub recipient: String,
    pub amount: u64,
    pub trx_id: String,
    pub op_in_trx: u32,
    /// Depositing settlement chain account
    pub username: String,
    pub block_num: u64,
}

/// Treasury payout for a burn on a destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub source_chain: ChainId,
    pub trx_hash: String,
    pub username: String,
    pub amount: u64,
    pub symbol: Symbol,
    pub block_num: u64,
}

/// Governance change proposable through an operator memo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GovernanceMethod {
    AddSigner,
    RemoveSigner,
    UpdateThreshold,
    Pause,
    Unpause,
}

impl GovernanceMethod {
    pub const ALL: [GovernanceMethod; 5] = [
        GovernanceMethod::AddSigner,
        GovernanceMethod::RemoveSigner,
        GovernanceMethod::UpdateThreshold,
        GovernanceMethod::Pause,
        GovernanceMethod::Unpause,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceMethod::AddSigner => "add-signer",
            GovernanceMethod::RemoveSigner => "remove-signer",
            GovernanceMethod::UpdateThreshold => "update-threshold",
            GovernanceMethod::Pause => "pause",
            GovernanceMethod::Unpause => "unpause",
        }
    }

    /// Whether `chain` can execute this method
    pub fn supported_on(&self, chain: ChainId) -> bool {
        match chain.family() {
            ChainFamily::Ethereum => true,
            ChainFamily::Hive => matches!(
                self,
                GovernanceMethod::AddSigner
                    | GovernanceMethod::RemoveSigner
                    | GovernanceMethod::UpdateThreshold
            ),
        }
    }

    /// Methods that carry a target
    pub fn takes_target(&self) -> bool {
        !matches!(self, GovernanceMethod::Pause | GovernanceMethod::Unpause)
    }
}

impl fmt::Display for GovernanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GovernanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GovernanceMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown governance method: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceProposal {
    pub chain: ChainId,
    pub method: GovernanceMethod,
    /// Account name, threshold value, or empty for pause/unpause
    pub target: String,
    pub block_num: u64,
    pub proposer: String,
}

/// A state change that needs a quorum of operator signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Mint(MintRequest),
    Redemption(RedemptionRequest),
    Governance(GovernanceProposal),
}

impl Action {
    /// Deterministic key every operator derives from the same source event
    pub fn content_key(&self) -> String {
        match self {
            Action::Mint(m) => format!("{}:{}:{}", m.chain, m.trx_id, m.op_in_trx),
            Action::Redemption(r) => format!("{}:{}", r.source_chain, r.trx_hash),
            Action::Governance(g) => {
                format!("{}:{}:{}:{}", g.chain, g.method, g.target, g.block_num)
            }
        }
    }

    /// Chain the action is submitted to
    pub fn chain(&self) -> ChainId {
        match self {
            Action::Mint(m) => m.chain,
            Action::Redemption(_) => ChainId::Hive,
            Action::Governance(g) => g.chain,
        }
    }

    /// Transferred value, used to pick eviction victims
    pub fn value(&self) -> u64 {
        match self {
            Action::Mint(m) => m.amount,
            Action::Redemption(r) => r.amount,
            Action::Governance(_) => 0,
        }
    }
}

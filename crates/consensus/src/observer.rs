//! Chain event observer
//!
//! Turns normalized adapter events into engine entries. This is the only
//! place entries are created: gossip can add votes, never actions.

use crate::engine::ThresholdEngine;
use crate::error::GovernanceMemoError;
use crate::operators::OperatorRegistry;
use bridge_chain::crypto::normalize_address;
use bridge_chain::{
    Action, BurnEvent, ChainAdapter, ChainEvent, ChainFamily, ChainId, ChainSet, GovernanceMethod,
    GovernanceProposal, MintRequest, RedemptionRequest, TransferEvent,
};
use bridge_gossip::codec::now_ms;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const GOVERNANCE_PREFIX: &str = "governance";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernanceStep {
    /// Open a proposal
    Start,
    /// Co-sign an open proposal
    Vote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernanceMemo {
    pub step: GovernanceStep,
    pub method: GovernanceMethod,
    /// Empty for pause / unpause
    pub target: String,
}

/// Parse `governance:<start|vote>:<method>[:<target>]`
pub fn parse_governance_memo(memo: &str) -> Result<GovernanceMemo, GovernanceMemoError> {
    let mut parts = memo.trim().splitn(4, ':');
    if parts.next() != Some(GOVERNANCE_PREFIX) {
        return Err(GovernanceMemoError::NotGovernance);
    }
    let step = match parts.next() {
        Some("start") => GovernanceStep::Start,
        Some("vote") => GovernanceStep::Vote,
        other => {
            return Err(GovernanceMemoError::UnknownAction(
                other.unwrap_or_default().to_string(),
            ))
        }
    };
    let raw_method = parts.next().unwrap_or_default();
    let method = GovernanceMethod::from_str(raw_method)
        .map_err(|_| GovernanceMemoError::UnknownMethod(raw_method.to_string()))?;
    let target = parts.next().unwrap_or_default().trim().to_string();

    let valid = match method {
        GovernanceMethod::AddSigner | GovernanceMethod::RemoveSigner => is_valid_account_name(&target),
        GovernanceMethod::UpdateThreshold => target.parse::<u32>().is_ok_and(|t| t > 0),
        GovernanceMethod::Pause | GovernanceMethod::Unpause => target.is_empty(),
    };
    if !valid {
        return Err(GovernanceMemoError::InvalidTarget {
            method: method.to_string(),
            target,
        });
    }
    Ok(GovernanceMemo {
        step,
        method,
        target,
    })
}

/// Settlement chain account names: 3-16 chars of dot separated segments,
/// each at least 3 long, starting with a letter, ending alphanumeric
pub fn is_valid_account_name(name: &str) -> bool {
    if !(3..=16).contains(&name.len()) {
        return false;
    }
    name.split('.').all(|segment| {
        let bytes = segment.as_bytes();
        bytes.len() >= 3
            && bytes[0].is_ascii_lowercase()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    })
}

/// Destination chain for a mint memo prefix and deposited symbol
fn mint_chain(prefix: &str, transfer: &TransferEvent) -> Option<ChainId> {
    if let Some(family) = ChainFamily::from_memo_prefix(prefix) {
        return ChainId::for_symbol(family, transfer.symbol);
    }
    let chain = ChainId::from_str(prefix).ok()?;
    (chain.family() == ChainFamily::Ethereum && chain.wrapped_symbol() == Some(transfer.symbol))
        .then_some(chain)
}

pub struct EventObserver {
    treasury: String,
    chains: ChainSet,
    registry: Arc<OperatorRegistry>,
    mint: Arc<ThresholdEngine>,
    redemption: Arc<ThresholdEngine>,
    governance: Arc<ThresholdEngine>,
    /// Operator this node signs for
    my_operator: Option<String>,
}

impl EventObserver {
    pub fn new(
        treasury: impl Into<String>,
        chains: ChainSet,
        registry: Arc<OperatorRegistry>,
        mint: Arc<ThresholdEngine>,
        redemption: Arc<ThresholdEngine>,
        governance: Arc<ThresholdEngine>,
        my_operator: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            treasury: treasury.into(),
            chains,
            registry,
            mint,
            redemption,
            governance,
            my_operator,
        })
    }

    pub async fn handle_event(&self, event: ChainEvent) {
        self.handle_event_at(event, now_ms()).await
    }

    pub async fn handle_event_at(&self, event: ChainEvent, now: u64) {
        match event {
            ChainEvent::Transfer(transfer) => self.handle_transfer(transfer, now).await,
            ChainEvent::Burn(burn) => self.handle_burn(burn).await,
        }
    }

    async fn handle_transfer(&self, transfer: TransferEvent, now: u64) {
        if transfer.to != self.treasury {
            return;
        }
        if transfer.memo.starts_with(GOVERNANCE_PREFIX) {
            self.handle_governance(transfer, now).await;
            return;
        }

        let Some((prefix, address)) = transfer.memo.split_once(':') else {
            tracing::debug!("Deposit {} has no destination memo", transfer.trx_id);
            return;
        };
        let Some(chain) = mint_chain(prefix.trim(), &transfer) else {
            tracing::debug!("Deposit {} names unsupported chain {}", transfer.trx_id, prefix);
            return;
        };
        let recipient = match normalize_address(address.trim()) {
            Ok(recipient) => recipient,
            Err(e) => {
                tracing::warn!("Deposit {} has invalid address: {}", transfer.trx_id, e);
                return;
            }
        };
        if transfer.amount == 0 || !self.chains.contains(chain) {
            return;
        }

        let action = Action::Mint(MintRequest {
            chain,
            recipient,
            amount: transfer.amount,
            trx_id: transfer.trx_id,
            op_in_trx: transfer.op_in_trx,
            username: transfer.from,
            block_num: transfer.block_num,
        });
        if let Err(e) = self.mint.observe(action, transfer.timestamp).await {
            tracing::warn!("Could not track mint: {}", e);
        }
    }

    async fn handle_burn(&self, burn: BurnEvent) {
        let Some(symbol) = burn.chain.wrapped_symbol() else {
            return;
        };
        if burn.amount == 0 || !is_valid_account_name(&burn.username) {
            tracing::warn!(
                "Ignoring burn {} on {}: bad amount or account {}",
                burn.trx_hash,
                burn.chain,
                burn.username
            );
            return;
        }

        let action = Action::Redemption(RedemptionRequest {
            source_chain: burn.chain,
            trx_hash: burn.trx_hash,
            username: burn.username,
            amount: burn.amount,
            symbol,
            block_num: burn.block_num,
        });
        if let Err(e) = self.redemption.observe(action, burn.timestamp).await {
            tracing::warn!("Could not track redemption: {}", e);
        }
    }

    async fn handle_governance(&self, transfer: TransferEvent, now: u64) {
        if !self.registry.is_operator(&transfer.from) {
            tracing::debug!("Governance memo from non-operator {}", transfer.from);
            return;
        }
        let expiry = self.governance.config().expiry.as_millis() as u64;
        if now.saturating_sub(transfer.timestamp) > expiry {
            tracing::debug!("Ignoring expired governance memo {}", transfer.trx_id);
            return;
        }
        let memo = match parse_governance_memo(&transfer.memo) {
            Ok(memo) => memo,
            Err(e) => {
                tracing::warn!("Bad governance memo from {}: {}", transfer.from, e);
                return;
            }
        };

        let own = self.my_operator.as_deref() == Some(transfer.from.as_str());
        let chains: Vec<ChainId> = self
            .chains
            .ids()
            .into_iter()
            .filter(|chain| memo.method.supported_on(*chain))
            .collect();

        match memo.step {
            GovernanceStep::Start => {
                for chain in chains {
                    let action = Action::Governance(GovernanceProposal {
                        chain,
                        method: memo.method,
                        target: memo.target.clone(),
                        block_num: transfer.block_num,
                        proposer: transfer.from.clone(),
                    });
                    if let Err(e) = self
                        .governance
                        .observe_with(action, transfer.timestamp, own)
                        .await
                    {
                        tracing::warn!("Could not open {} proposal on {}: {}", memo.method, chain, e);
                    }
                }
            }
            GovernanceStep::Vote if own => {
                for chain in chains {
                    let Some(key) = self.governance.find_open(chain, memo.method, &memo.target) else {
                        tracing::debug!("No open {} proposal on {}", memo.method, chain);
                        continue;
                    };
                    if let Err(e) = self.governance.sign_existing(&key).await {
                        tracing::warn!("Could not sign {}: {}", key, e);
                    }
                }
            }
            GovernanceStep::Vote => {}
        }
    }

    /// Consume `adapter`'s event feed until it closes
    pub fn spawn(self: &Arc<Self>, adapter: Arc<dyn ChainAdapter>) -> JoinHandle<()> {
        let observer = self.clone();
        let mut events = adapter.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => observer.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("{} observer lagged, {} events missed", adapter.id(), missed);
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("{} event feed closed", adapter.id());
                        break;
                    }
                }
            }
        })
    }

    /// One observer task per configured chain
    pub fn spawn_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.chains
            .iter()
            .map(|(_, adapter)| self.spawn(adapter.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_governance_memo() {
        assert_eq!(
            parse_governance_memo("governance:start:add-signer:erin").unwrap(),
            GovernanceMemo {
                step: GovernanceStep::Start,
                method: GovernanceMethod::AddSigner,
                target: "erin".to_string(),
            }
        );
        assert_eq!(
            parse_governance_memo("governance:vote:pause").unwrap().target,
            ""
        );
        assert_eq!(
            parse_governance_memo("ETH:0xabc"),
            Err(GovernanceMemoError::NotGovernance)
        );
        assert_eq!(
            parse_governance_memo("governance:cancel:pause"),
            Err(GovernanceMemoError::UnknownAction("cancel".to_string()))
        );
        assert_eq!(
            parse_governance_memo("governance:start:mint:erin"),
            Err(GovernanceMemoError::UnknownMethod("mint".to_string()))
        );
        assert!(parse_governance_memo("governance:start:update-threshold:0").is_err());
        assert!(parse_governance_memo("governance:start:update-threshold:two").is_err());
        assert!(parse_governance_memo("governance:start:update-threshold:3").is_ok());
        assert!(parse_governance_memo("governance:start:remove-signer:X").is_err());
    }

    #[test]
    fn test_account_names() {
        assert!(is_valid_account_name("alice"));
        assert!(is_valid_account_name("bridge.ops-1"));
        assert!(!is_valid_account_name("al"));
        assert!(!is_valid_account_name("1alice"));
        assert!(!is_valid_account_name("alice-"));
        assert!(!is_valid_account_name("ab.cd"));
        assert!(!is_valid_account_name("averyveryverylongname"));
    }
}

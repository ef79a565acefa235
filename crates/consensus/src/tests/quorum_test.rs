//! Quorum Scenario Tests
//!
//! Drives one mint engine against an in-process ledger:
//! - Quorum against the live threshold, including mid-flight changes
//! - Exactly one submission per action
//! - Unregistered and wrong-key votes never count
//! - Expiry and operator removal

use std::sync::Arc;
use std::time::Duration;

use bridge_chain::{
    Action, Authority, AuthorityMember, ChainAdapter, ChainFamily, ChainId, ChainSet,
    MemoryLedger, MintRequest, OperatorCredential,
};
use bridge_gossip::codec::now_ms;

use crate::{
    engine::{EngineConfig, EngineKind, RemovedOperatorPolicy, ThresholdEngine},
    error::VoteRejection,
    operators::{OperatorRegistry, RegistryConfig},
    pending::VoteStatus,
    sink::RecordingSink,
};

const CONTRACT: &str = "0x00000000000000000000000000000000000000c0";
const DAY_MS: u64 = 24 * 60 * 60 * 1000;

struct Harness {
    ledger: Arc<MemoryLedger>,
    registry: Arc<OperatorRegistry>,
    engine: Arc<ThresholdEngine>,
    ops: Vec<OperatorCredential>,
}

fn authority(ops: &[OperatorCredential], threshold: usize) -> Authority {
    Authority {
        threshold,
        members: ops
            .iter()
            .map(|op| AuthorityMember {
                username: op.username().to_string(),
                public_key: op.public_key(),
            })
            .collect(),
    }
}

fn harness_with(names: &[&str], threshold: usize, config: EngineConfig) -> Harness {
    let ops: Vec<_> = names
        .iter()
        .map(|n| OperatorCredential::generate(*n, &mut rand::thread_rng()))
        .collect();
    let ledger = Arc::new(MemoryLedger::new(ChainId::EthHive, CONTRACT).with_authority(authority(&ops, threshold)));
    let registry = Arc::new(OperatorRegistry::new(RegistryConfig::default(), ledger.clone()));
    registry.apply_authority(&ledger.authority(), 0);
    let engine = ThresholdEngine::new(
        EngineKind::Mint,
        config,
        ChainSet::new().with(ledger.clone()),
        registry.clone(),
        Arc::new(RecordingSink::new()),
        None,
    );
    Harness {
        ledger,
        registry,
        engine,
        ops,
    }
}

fn harness(threshold: usize) -> Harness {
    harness_with(&["alice", "bob", "carol"], threshold, EngineConfig::default())
}

fn mint(trx_id: &str) -> Action {
    Action::Mint(MintRequest {
        chain: ChainId::EthHive,
        recipient: "0x00000000000000000000000000000000000000aa".to_string(),
        amount: 2500,
        trx_id: trx_id.to_string(),
        op_in_trx: 0,
        username: "dave".to_string(),
        block_num: 42,
    })
}

impl Harness {
    async fn observe(&self, action: &Action) -> String {
        assert!(self.engine.observe(action.clone(), now_ms()).await.unwrap());
        action.content_key()
    }

    async fn signature(&self, op: usize, action: &Action) -> String {
        let digest = self.ledger.compute_action_digest(action).await.unwrap();
        ChainFamily::Ethereum.sign(&self.ops[op], &digest).unwrap()
    }

    async fn cast(&self, op: usize, action: &Action) {
        let signature = self.signature(op, action).await;
        self.engine
            .receive_vote(
                action.content_key(),
                self.ops[op].username().to_string(),
                signature,
            )
            .await;
    }

    fn status(&self, key: &str) -> Option<VoteStatus> {
        self.engine.get(key).map(|view| view.status)
    }
}

#[tokio::test]
async fn test_two_of_three_reaches_quorum() {
    let h = harness(2);
    let action = mint("t1");
    let key = h.observe(&action).await;

    h.cast(0, &action).await;
    assert_eq!(h.status(&key), Some(VoteStatus::Voting));
    h.cast(1, &action).await;

    assert_eq!(h.status(&key), Some(VoteStatus::Submitted));
    let submissions = h.ledger.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].signatures.len(), 2);
}

#[tokio::test]
async fn test_three_of_three_submits_exactly_once() {
    let h = harness(3);
    let action = mint("t2");
    let key = h.observe(&action).await;

    h.cast(0, &action).await;
    h.cast(1, &action).await;
    assert_eq!(h.status(&key), Some(VoteStatus::Voting));
    assert_eq!(h.ledger.submit_call_count(), 0);

    h.cast(2, &action).await;
    h.cast(2, &action).await;
    let carol = h.signature(2, &action).await;
    assert_eq!(h.engine.vote(&key, "carol", &carol), Err(VoteRejection::Duplicate));

    assert_eq!(h.status(&key), Some(VoteStatus::Submitted));
    assert_eq!(h.ledger.submit_call_count(), 1);

    h.engine.tick().await;
    assert_eq!(h.ledger.submit_call_count(), 1);
    assert!(h.engine.get(&key).is_none());
}

#[tokio::test]
async fn test_threshold_lowered_mid_flight() {
    let h = harness(3);
    let action = mint("t3");
    let key = h.observe(&action).await;

    h.cast(0, &action).await;
    h.cast(1, &action).await;
    assert_eq!(h.status(&key), Some(VoteStatus::Voting));

    h.ledger.set_threshold(2);
    h.engine.tick().await;
    assert_eq!(h.status(&key), Some(VoteStatus::Submitted));
    assert_eq!(h.ledger.submissions().len(), 1);
}

#[tokio::test]
async fn test_threshold_raised_mid_flight() {
    let h = harness(2);
    let action = mint("t4");
    let key = h.observe(&action).await;

    h.cast(0, &action).await;
    h.ledger.set_threshold(3);
    h.cast(1, &action).await;

    assert_eq!(h.status(&key), Some(VoteStatus::Voting));
    assert_eq!(h.ledger.submit_call_count(), 0);
}

#[tokio::test]
async fn test_unregistered_and_wrong_key_votes_never_count() {
    let h = harness(2);
    let action = mint("t5");
    let key = h.observe(&action).await;

    let mallory = OperatorCredential::generate("mallory", &mut rand::thread_rng());
    let digest = h.ledger.compute_action_digest(&action).await.unwrap();
    let forged = ChainFamily::Ethereum.sign(&mallory, &digest).unwrap();

    assert_eq!(h.engine.vote(&key, "mallory", &forged), Err(VoteRejection::UnknownOperator));
    assert_eq!(h.engine.vote(&key, "bob", &forged), Err(VoteRejection::BadSignature));

    // Right key, wrong digest
    let other = h.signature(1, &mint("t6")).await;
    assert_eq!(h.engine.vote(&key, "bob", &other), Err(VoteRejection::BadSignature));

    assert_eq!(h.engine.vote(&key, "bob", "zz"), Err(VoteRejection::BadSignature));
    assert!(h.engine.get(&key).unwrap().operators.is_empty());
}

#[tokio::test]
async fn test_entry_expires_after_a_day() {
    let h = harness_with(
        &["alice", "bob", "carol"],
        3,
        EngineConfig {
            expiry: Duration::from_millis(DAY_MS),
            ..EngineConfig::default()
        },
    );
    let action = mint("t7");
    let created = now_ms();
    assert!(h.engine.observe(action.clone(), created).await.unwrap());
    let key = action.content_key();
    h.cast(0, &action).await;

    h.engine.tick_at(created + DAY_MS - 1).await;
    assert!(h.engine.get(&key).is_some());

    h.engine.tick_at(created + DAY_MS + 1).await;
    assert!(h.engine.get(&key).is_none());

    let bob = h.signature(1, &action).await;
    assert_eq!(h.engine.vote(&key, "bob", &bob), Err(VoteRejection::MissingEntry));
}

#[tokio::test]
async fn test_stale_event_is_not_tracked() {
    let h = harness(2);
    let old = now_ms() - 8 * DAY_MS;
    assert!(!h.engine.observe(mint("t8"), old).await.unwrap());
    assert!(h.engine.is_empty());
}

#[tokio::test]
async fn test_removed_operator_votes_revalidated() {
    let h = harness_with(&["alice", "bob", "carol", "dave"], 3, EngineConfig::default());
    let action = mint("t9");
    let key = h.observe(&action).await;

    h.cast(0, &action).await;
    h.cast(1, &action).await;

    let remaining = authority(&h.ops[1..], 3);
    h.ledger.set_authority(remaining.clone());
    h.registry.apply_authority(&remaining, now_ms());
    h.engine.tick().await;
    assert_eq!(h.engine.get(&key).unwrap().operators, vec!["bob".to_string()]);

    h.cast(0, &action).await;
    assert_eq!(h.engine.get(&key).unwrap().operators.len(), 1);

    h.cast(2, &action).await;
    assert_eq!(h.status(&key), Some(VoteStatus::Voting));
    h.cast(3, &action).await;
    assert_eq!(h.status(&key), Some(VoteStatus::Submitted));
}

#[tokio::test]
async fn test_quorum_check_ignores_departed_operator_before_tick() {
    let h = harness_with(&["alice", "bob", "carol", "dave"], 3, EngineConfig::default());
    let action = mint("t13");
    let key = h.observe(&action).await;
    h.cast(0, &action).await;
    h.cast(1, &action).await;

    let remaining = authority(&h.ops[1..], 3);
    h.ledger.set_authority(remaining.clone());
    h.registry.apply_authority(&remaining, now_ms());

    h.cast(2, &action).await;
    assert_eq!(h.status(&key), Some(VoteStatus::Voting));
    assert_eq!(h.ledger.submit_call_count(), 0);
    assert_eq!(h.engine.get(&key).unwrap().operators.len(), 2);
}

#[tokio::test]
async fn test_removed_operator_votes_retained() {
    let h = harness_with(
        &["alice", "bob", "carol", "dave"],
        3,
        EngineConfig {
            removed_operator_policy: RemovedOperatorPolicy::Retain,
            ..EngineConfig::default()
        },
    );
    let action = mint("t10");
    let key = h.observe(&action).await;
    h.cast(0, &action).await;

    let remaining = authority(&h.ops[1..], 3);
    h.registry.apply_authority(&remaining, now_ms());
    h.engine.tick().await;
    assert_eq!(h.engine.get(&key).unwrap().operators, vec!["alice".to_string()]);

    // Never on new entries
    let fresh = mint("t11");
    let fresh_key = h.observe(&fresh).await;
    let alice = h.signature(0, &fresh).await;
    assert_eq!(
        h.engine.vote(&fresh_key, "alice", &alice),
        Err(VoteRejection::UnknownOperator)
    );
}

#[tokio::test]
async fn test_vote_before_entry_is_buffered() {
    let h = harness_with(
        &["alice", "bob", "carol"],
        1,
        EngineConfig {
            vote_retry: crate::retry::RetryPolicy {
                max_attempts: 20,
                delay: Duration::from_millis(20),
            },
            ..EngineConfig::default()
        },
    );
    let action = mint("t12");
    h.cast(0, &action).await;
    assert!(h.engine.is_empty());

    let key = h.observe(&action).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.status(&key) != Some(VoteStatus::Submitted) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("buffered vote was not applied");
}

#[tokio::test]
async fn test_early_votes_are_capped_and_operator_only() {
    let h = harness_with(
        &["alice", "bob", "carol"],
        2,
        EngineConfig {
            vote_buffer_limit: 16,
            ..EngineConfig::default()
        },
    );
    for i in 0..5000 {
        h.engine
            .receive_vote(format!("bogus-{}", i), "nobody".to_string(), "00".to_string())
            .await;
    }
    assert_eq!(h.engine.buffered_votes(), 0);

    for i in 0..5000 {
        h.engine
            .receive_vote(format!("bogus-{}", i), "alice".to_string(), "00".to_string())
            .await;
    }
    assert_eq!(h.engine.buffered_votes(), 16);
}

#[tokio::test]
async fn test_early_vote_dropped_after_retry_rounds() {
    let h = harness_with(
        &["alice", "bob", "carol"],
        1,
        EngineConfig {
            vote_retry: crate::retry::RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(20),
            },
            ..EngineConfig::default()
        },
    );
    let action = mint("t14");
    h.cast(0, &action).await;
    assert_eq!(h.engine.buffered_votes(), 1);

    assert_eq!(h.engine.retry_buffered().await, 0);
    assert_eq!(h.engine.retry_buffered().await, 0);
    assert_eq!(h.engine.buffered_votes(), 1);
    h.engine.retry_buffered().await;
    assert_eq!(h.engine.buffered_votes(), 0);

    let key = h.observe(&action).await;
    assert!(h.engine.get(&key).unwrap().operators.is_empty());
    assert_eq!(h.ledger.submit_call_count(), 0);
}

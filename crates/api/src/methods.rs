//! Status methods - response shapes and lookups behind each route

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bridge_chain::{Action, ChainId};
use bridge_consensus::{OperatorNode, OperatorStatus, PendingView, ThresholdEngine};
use bridge_gossip::codec::now_ms;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Parameters longer than this are destination chain addresses
const MAX_ACCOUNT_NAME_LEN: usize = 16;
const MIN_PARAM_LEN: usize = 3;

/// Shared state behind every handler
pub struct StatusContext {
    pub node: Arc<OperatorNode>,
    pub version: String,
}

impl StatusContext {
    pub fn new(node: Arc<OperatorNode>) -> Self {
        Self {
            node,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad param")]
    BadParam,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadParam => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeHealth {
    /// Enough operators are connected to reach the threshold
    Healthy,
    Unknown,
}

#[derive(Debug, Serialize)]
pub struct OperatorSummary {
    pub username: String,
    pub status: OperatorStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub version: String,
    pub chains: Vec<ChainId>,
    pub threshold: usize,
    pub operators: Vec<OperatorSummary>,
    pub bridge_health: BridgeHealth,
    pub operator: Option<String>,
    pub peers: usize,
}

pub fn bridge_health(connected: usize, threshold: usize) -> BridgeHealth {
    if threshold > 0 && connected >= threshold {
        BridgeHealth::Healthy
    } else {
        BridgeHealth::Unknown
    }
}

pub fn node_summary(ctx: &StatusContext) -> NodeSummary {
    let now = now_ms();
    let registry = ctx.node.registry();
    let threshold = registry.threshold();
    NodeSummary {
        version: ctx.version.clone(),
        chains: ctx.node.chains().ids(),
        threshold,
        operators: registry
            .views(now)
            .into_iter()
            .map(|view| OperatorSummary {
                username: view.username,
                status: view.status,
            })
            .collect(),
        bridge_health: bridge_health(registry.connected_count(now), threshold),
        operator: ctx.node.operator().map(str::to_string),
        peers: ctx.node.transport().directory().len(),
    }
}

pub fn pending(engine: &ThresholdEngine) -> Vec<PendingView> {
    engine.views()
}

/// Pending mints for a depositing account, or for a recipient address
/// when `param` is too long to be an account name
pub fn pending_mints_for(engine: &ThresholdEngine, param: &str) -> Result<Vec<PendingView>, ApiError> {
    if param.len() < MIN_PARAM_LEN {
        return Err(ApiError::BadParam);
    }
    let by_address = param.len() > MAX_ACCOUNT_NAME_LEN;
    let needle = param.to_ascii_lowercase();
    Ok(engine
        .views()
        .into_iter()
        .filter(|view| match &view.action {
            Action::Mint(m) if by_address => m.recipient == needle,
            Action::Mint(m) => m.username == needle,
            _ => false,
        })
        .collect())
}

//! HTTP Status Server
//!
//! Read-only JSON endpoints over the node's registry, mesh and engines.

use crate::methods::{node_summary, pending, pending_mints_for, ApiError, StatusContext};
use axum::{
    extract::{Path, State},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bridge_gossip::codec::now_ms;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// HTTP status server
pub struct StatusServer {
    context: Arc<StatusContext>,
}

impl StatusServer {
    pub fn new(context: StatusContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser dashboards
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", get(handle_root))
            .route("/status", get(handle_status))
            .route("/peers", get(handle_peers))
            .route("/operators", get(handle_operators))
            .route("/pending-mints", get(handle_pending_mints))
            .route("/pending-mints/:param", get(handle_pending_mints_for))
            .route("/pending-redemptions", get(handle_pending_redemptions))
            .route("/proposals", get(handle_proposals))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server on its own listener
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

type Ctx = State<Arc<StatusContext>>;

async fn handle_root(State(ctx): Ctx) -> impl IntoResponse {
    Json(node_summary(&ctx))
}

async fn handle_status() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}

async fn handle_peers(State(ctx): Ctx) -> impl IntoResponse {
    Json(ctx.node.transport().directory().peer_infos())
}

async fn handle_operators(State(ctx): Ctx) -> impl IntoResponse {
    Json(ctx.node.registry().views(now_ms()))
}

async fn handle_pending_mints(State(ctx): Ctx) -> impl IntoResponse {
    Json(pending(ctx.node.mint()))
}

async fn handle_pending_mints_for(
    State(ctx): Ctx,
    Path(param): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!("Pending mints lookup for {}", param);
    Ok(Json(pending_mints_for(ctx.node.mint(), &param)?))
}

async fn handle_pending_redemptions(State(ctx): Ctx) -> impl IntoResponse {
    Json(pending(ctx.node.redemption()))
}

async fn handle_proposals(State(ctx): Ctx) -> impl IntoResponse {
    Json(pending(ctx.node.governance()))
}

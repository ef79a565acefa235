//! Bridge API - Read-only HTTP status surface
//!
//! Served on the same listener as the gossip WebSocket, so a peer probing
//! `GET /status` on a claimed address reaches this router:
//! - `/`, `/status`: version, chains, threshold, operator and bridge health
//! - `/peers`, `/operators`: mesh and operator views
//! - `/pending-mints`, `/pending-redemptions`, `/proposals`: engine tables

pub mod http_server;
pub mod methods;

pub use http_server::StatusServer;
pub use methods::{ApiError, BridgeHealth, StatusContext};

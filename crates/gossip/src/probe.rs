//! Reachability probe
//!
//! A peer is listed as public only if its claimed address answers
//! `GET /status` with `{"status":"OK"}`. This proves that *something*
//! answers at that address, not that it is the same process holding the
//! socket; the peer list is a discovery hint, never a trust anchor.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, address: &str) -> bool;
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

/// Probe over plain HTTP against the node's status endpoint
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn is_reachable(&self, address: &str) -> bool {
        let url = format!("http://{}/status", address);
        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!("Probe {} returned {}", address, response.status());
                return false;
            }
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", address, e);
                return false;
            }
        };
        matches!(response.json::<StatusBody>().await, Ok(body) if body.status == "OK")
    }
}

/// Probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

#[async_trait]
impl ReachabilityProbe for FixedProbe {
    async fn is_reachable(&self, _address: &str) -> bool {
        self.0
    }
}

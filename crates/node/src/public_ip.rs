//! Public address detection

use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

const IPV4_ECHO: &str = "https://api4.ipify.org?format=json";
const IPV6_ECHO: &str = "https://api6.ipify.org?format=json";

#[derive(Deserialize)]
struct EchoResponse {
    ip: String,
}

async fn query(client: &reqwest::Client, url: &str) -> anyhow::Result<IpAddr> {
    let response: EchoResponse = client
        .get(url)
        .timeout(Duration::from_secs(5))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(response.ip.parse()?)
}

/// `host:port` for an IP, IPv6 bracketed
pub fn join_host_port(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}

/// Ask an echo service for our public IP, preferring IPv4
pub async fn detect_public_address(port: u16) -> Option<String> {
    let client = reqwest::Client::new();
    for url in [IPV4_ECHO, IPV6_ECHO] {
        match query(&client, url).await {
            Ok(ip) => return Some(join_host_port(ip, port)),
            Err(e) => tracing::debug!("Public IP lookup via {} failed: {}", url, e),
        }
    }
    tracing::warn!("Could not detect a public IP, running as a private node");
    None
}

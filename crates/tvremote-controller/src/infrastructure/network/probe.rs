//! Fallback probe for networks where SSDP multicast is blocked.
//!
//! Tries a plaintext WebSocket handshake against the remote-control endpoint
//! on a fixed list of addresses typical for home routers.  Every candidate is
//! probed at once, each bounded by its own timeout; the winner is the first
//! address in list order that accepted.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;
use tvremote_core::{remote_control_url, Scheme};

/// Name shown by a TV that logs the probe connection.
pub const PROBE_APP_NAME: &str = "AutoScanApp";

const SUBNET_PREFIXES: [&str; 3] = ["192.168.1.", "192.168.0.", "10.0.0."];
const HOST_OCTETS: [u8; 14] = [2, 10, 20, 30, 40, 50, 60, 70, 80, 100, 120, 150, 180, 200];

/// Where and how long to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub candidates: Vec<String>,
    pub port: u16,
    pub timeout: Duration,
}

/// The 42 default candidates, subnet by subnet.
pub fn default_candidates() -> Vec<String> {
    SUBNET_PREFIXES
        .iter()
        .flat_map(|prefix| HOST_OCTETS.iter().map(move |octet| format!("{prefix}{octet}")))
        .collect()
}

/// Returns the first candidate that completed a WebSocket handshake.
pub async fn probe_first(settings: &ProbeSettings) -> Option<String> {
    let attempts: Vec<(String, JoinHandle<bool>)> = settings
        .candidates
        .iter()
        .map(|ip| {
            let url = remote_control_url(Scheme::Plain, ip, settings.port, PROBE_APP_NAME, None);
            let bound = settings.timeout;
            (ip.clone(), tokio::spawn(probe_one(url, bound)))
        })
        .collect();

    let mut winner = None;
    for (ip, handle) in attempts {
        if winner.is_some() {
            handle.abort();
            continue;
        }
        if let Ok(true) = handle.await {
            winner = Some(ip);
        }
    }

    if let Some(ip) = &winner {
        debug!("probe answered by {ip}");
    }
    winner
}

async fn probe_one(url: String, bound: Duration) -> bool {
    match timeout(bound, tokio_tungstenite::connect_async(url.as_str())).await {
        Ok(Ok((mut ws, _))) => {
            let _ = ws.close(None).await;
            true
        }
        Ok(Err(e)) => {
            debug!("probe {url} failed: {e}");
            false
        }
        Err(_) => false,
    }
}

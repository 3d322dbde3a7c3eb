//! SSDP discovery of Samsung TVs on the local network.
//!
//! One discovery run works like this:
//!
//! 1. Bind an ephemeral UDP socket, join the SSDP multicast group, and send a
//!    single `M-SEARCH` request to `239.255.255.250:1900`.
//! 2. For the length of the discovery window, parse every response as an
//!    HTTP-style header block.  Responses that do not look like a Samsung TV
//!    are dropped.  The rest become [`DiscoveryRecord`]s keyed by IP: the first
//!    sighting emits [`DiscoveryEvent::Found`], later sightings are merged
//!    quietly.
//! 3. For each record with a `LOCATION`, fetch the UPnP device description
//!    and read `friendlyName`/`modelName` out of it.  A record that changed is
//!    re-emitted as [`DiscoveryEvent::Updated`].
//! 4. When the window closes, unfinished fetches are abandoned.  If not a
//!    single datagram was heard, the fallback probe (`super::probe`) tries a
//!    fixed list of common addresses.
//! 5. [`DiscoveryEvent::Done`] is sent exactly once, last, with every record.
//!
//! Socket failures never surface as an error to the caller; they are logged,
//! the window is still waited out, and the run ends with `Done`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use tvremote_core::domain::discovery::grab_tag;
use tvremote_core::{DiscoveryRecord, SessionSnapshot, SsdpHeaders};

use super::probe::{self, ProbeSettings};
use crate::infrastructure::storage::config::{DiscoveryConfig, SessionConfig};

/// The SSDP multicast group and port.
pub const SSDP_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

/// Error type for discovery socket setup.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// The M-SEARCH datagram could not be sent.
    #[error("failed to send M-SEARCH to {addr}: {source}")]
    SendFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Progress reported by a discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First sighting of a TV.
    Found(DiscoveryRecord),
    /// A known TV gained metadata from its device description.
    Updated(DiscoveryRecord),
    /// The run is over.  Always the final event.
    Done(Vec<DiscoveryRecord>),
}

/// Knobs for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub timeout: Duration,
    pub mx: u8,
    pub search_target: String,
    /// Where the M-SEARCH is sent.  Tests point this at a local responder.
    pub target: SocketAddr,
    pub reemit_on_enrichment: bool,
    /// `None` disables the fallback probe.
    pub probe: Option<ProbeSettings>,
}

impl DiscoverySettings {
    pub fn from_config(discovery: &DiscoveryConfig, session: &SessionConfig) -> Self {
        let probe = discovery.fallback_probe.then(|| ProbeSettings {
            candidates: probe::default_candidates(),
            port: session.probe_port,
            timeout: discovery.probe_timeout(),
        });
        Self {
            timeout: discovery.timeout(),
            mx: discovery.mx,
            search_target: discovery.search_target.clone(),
            target: SocketAddr::V4(SSDP_ADDR),
            reemit_on_enrichment: discovery.reemit_on_enrichment,
            probe,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default(), &SessionConfig::default())
    }
}

/// Runs SSDP searches.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    settings: DiscoverySettings,
    http: reqwest::Client,
}

impl DiscoveryEngine {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    /// Starts a run in the background and returns its event stream.
    ///
    /// The stream yields `Found`/`Updated` events as they happen and ends with
    /// exactly one `Done`.  Dropping the receiver stops the run early.
    pub fn start(&self) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel(64);
        let settings = self.settings.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            run(settings, http, tx).await;
        });
        rx
    }

    /// Runs to completion and returns the final record list.
    pub async fn discover_all(&self) -> Vec<DiscoveryRecord> {
        let mut rx = self.start();
        while let Some(event) = rx.recv().await {
            if let DiscoveryEvent::Done(records) = event {
                return records;
            }
        }
        Vec::new()
    }
}

/// Sets `is_connected` on the record matching the live session, if any.
pub fn mark_connected(records: &mut [DiscoveryRecord], session: &SessionSnapshot) {
    for record in records.iter_mut() {
        record.is_connected = session.is_connected_to(&record.ip);
    }
}

// ── Run loop ──────────────────────────────────────────────────────────────────

/// Records in first-seen order, indexed by IP.
#[derive(Default)]
struct RecordSet {
    records: Vec<DiscoveryRecord>,
    by_ip: HashMap<String, usize>,
}

impl RecordSet {
    /// Inserts or merges; returns the record and whether it is new.
    fn upsert(&mut self, record: DiscoveryRecord) -> (&DiscoveryRecord, bool) {
        match self.by_ip.get(&record.ip) {
            Some(&i) => {
                self.records[i].merge(&record);
                (&self.records[i], false)
            }
            None => {
                let i = self.records.len();
                self.by_ip.insert(record.ip.clone(), i);
                self.records.push(record);
                (&self.records[i], true)
            }
        }
    }

    fn get_mut(&mut self, ip: &str) -> Option<&mut DiscoveryRecord> {
        let i = *self.by_ip.get(ip)?;
        self.records.get_mut(i)
    }
}

type Description = (String, Option<String>, Option<String>);

async fn run(settings: DiscoverySettings, http: reqwest::Client, tx: mpsc::Sender<DiscoveryEvent>) {
    let deadline = Instant::now() + settings.timeout;
    let mut found = RecordSet::default();
    let mut fetches: JoinSet<Description> = JoinSet::new();
    let mut fetching: Vec<String> = Vec::new();
    let mut heard_anything = false;

    match open_and_search(&settings).await {
        Ok(socket) => {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    received = socket.recv_from(&mut buf) => {
                        let (len, src) = match received {
                            Ok(pair) => pair,
                            Err(e) => {
                                debug!("ssdp recv error: {e}");
                                continue;
                            }
                        };
                        heard_anything = true;
                        let text = String::from_utf8_lossy(&buf[..len]);
                        let headers = SsdpHeaders::parse(&text);
                        if !headers.looks_like_samsung_tv() {
                            debug!("ignoring ssdp response from {src}: not a Samsung TV");
                            continue;
                        }

                        let (record, is_new) =
                            found.upsert(DiscoveryRecord::from_response(headers, src.ip()));
                        let record = record.clone();
                        if is_new {
                            info!("found TV at {}", record.ip);
                            if tx.send(DiscoveryEvent::Found(record.clone())).await.is_err() {
                                return;
                            }
                        }

                        if let Some(url) = record.location_url.clone() {
                            if !fetching.contains(&record.ip) {
                                fetching.push(record.ip.clone());
                                let remaining = deadline.saturating_duration_since(Instant::now());
                                fetches.spawn(fetch_description(http.clone(), record.ip, url, remaining));
                            }
                        }
                    }
                    Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                        let Ok((ip, name, model)) = joined else { continue };
                        let Some(record) = found.get_mut(&ip) else { continue };
                        if record.enrich(name, model) && settings.reemit_on_enrichment {
                            let updated = record.clone();
                            if tx.send(DiscoveryEvent::Updated(updated)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
        Err(e) => {
            warn!("ssdp search unavailable: {e}");
            sleep_until(deadline).await;
        }
    }

    fetches.abort_all();

    if !heard_anything {
        if let Some(probe_settings) = &settings.probe {
            info!("no ssdp responses; probing common addresses");
            if let Some(ip) = probe::probe_first(probe_settings).await {
                let (record, _) = found.upsert(DiscoveryRecord::synthetic(ip));
                let record = record.clone();
                if tx.send(DiscoveryEvent::Found(record)).await.is_err() {
                    return;
                }
            }
        }
    }

    info!("discovery finished with {} TV(s)", found.records.len());
    let _ = tx.send(DiscoveryEvent::Done(found.records)).await;
}

/// Binds the socket and sends the M-SEARCH.
async fn open_and_search(settings: &DiscoverySettings) -> Result<UdpSocket, DiscoveryError> {
    let bind_addr: SocketAddr = match settings.target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(DiscoveryError::BindFailed)?;

    if let IpAddr::V4(group) = settings.target.ip() {
        if group.is_multicast() {
            if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                warn!("could not join ssdp group {group}: {e}");
            }
        }
    }

    let request = m_search(settings);
    socket
        .send_to(request.as_bytes(), settings.target)
        .await
        .map_err(|source| DiscoveryError::SendFailed {
            addr: settings.target,
            source,
        })?;
    debug!("sent M-SEARCH for {} to {}", settings.search_target, settings.target);
    Ok(socket)
}

/// Formats the M-SEARCH request.
pub fn m_search(settings: &DiscoverySettings) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        settings.target, settings.mx, settings.search_target
    )
}

/// Fetches a UPnP description and extracts name and model.
///
/// Failures are logged and produce empty fields.
async fn fetch_description(
    http: reqwest::Client,
    ip: String,
    url: String,
    budget: Duration,
) -> Description {
    match get_text(&http, &url, budget).await {
        Ok(xml) => {
            let name = grab_tag(&xml, "friendlyName");
            let model = grab_tag(&xml, "modelName");
            debug!("description for {ip}: name={name:?} model={model:?}");
            (ip, name, model)
        }
        Err(e) => {
            debug!("description fetch for {ip} failed: {e}");
            (ip, None, None)
        }
    }
}

async fn get_text(http: &reqwest::Client, url: &str, budget: Duration) -> Result<String, reqwest::Error> {
    let response = http.get(url).timeout(budget).send().await?;
    response.error_for_status()?.text().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

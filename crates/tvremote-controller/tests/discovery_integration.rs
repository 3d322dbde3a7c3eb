//! Integration tests for LAN discovery.
//!
//! A loopback UDP socket plays the SSDP responder and a tiny HTTP server
//! serves the UPnP device description, so the engine runs its real socket
//! path without multicast.  The fallback probe is exercised against a local
//! WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tvremote_controller::application::session::{SessionHandle, SessionSettings};
use tvremote_controller::infrastructure::network::discovery::{
    mark_connected, DiscoveryEngine, DiscoveryEvent, DiscoverySettings,
};
use tvremote_controller::infrastructure::network::probe::{probe_first, ProbeSettings};
use tvremote_controller::infrastructure::network::transport::mock::MockChannel;
use tvremote_controller::infrastructure::storage::state::{token_key, KeyValueStore, MemoryStore};
use tvremote_core::SessionStatus;

const SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

const DESCRIPTION: &str = "<?xml version=\"1.0\"?>\
<root xmlns=\"urn:schemas-upnp-org:device-1-0\"><device>\
<friendlyName>[TV] Living Room</friendlyName>\
<manufacturer>Samsung Electronics</manufacturer>\
<modelName>QE55Q80T</modelName>\
</device></root>";

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Answers the first M-SEARCH with `replies`, one datagram each.
async fn spawn_ssdp_responder(replies: Vec<String>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        if !buf[..len].starts_with(b"M-SEARCH") {
            return;
        }
        for reply in replies {
            let _ = socket.send_to(reply.as_bytes(), from).await;
        }
        // Keep the socket alive until the run is over.
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
    addr
}

/// Serves `DESCRIPTION` to every request.
async fn spawn_description_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    DESCRIPTION.len(),
                    DESCRIPTION
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Accepts WebSocket handshakes and drains them.
async fn spawn_ws_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });
    addr
}

fn samsung_reply(http: SocketAddr, extra: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=1800\r\n\
         LOCATION: http://{http}/dmr.xml\r\n\
         SERVER: SHP, UPnP/1.0, Samsung UPnP SDK/1.0\r\n\
         ST: {SEARCH_TARGET}\r\n\
         USN: uuid:0ee6b280-00fa-1000-b44d-d0c24e1a2b3c::{SEARCH_TARGET}\r\n\
         {extra}\r\n"
    )
}

fn router_reply() -> String {
    "HTTP/1.1 200 OK\r\n\
     LOCATION: http://127.0.0.1:9/rootDesc.xml\r\n\
     SERVER: Linux/5.4 UPnP/1.1 MiniUPnPd/2.2\r\n\
     USN: uuid:router-1::upnp:rootdevice\r\n\r\n"
        .to_string()
}

fn settings(target: SocketAddr, timeout: Duration) -> DiscoverySettings {
    DiscoverySettings {
        timeout,
        mx: 1,
        search_target: SEARCH_TARGET.to_string(),
        target,
        reemit_on_enrichment: true,
        probe: None,
    }
}

async fn collect(engine: &DiscoveryEngine) -> Vec<DiscoveryEvent> {
    let mut rx = engine.start();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// ── SSDP path ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_reports_tv_once_enriches_it_and_ends_with_done() {
    // Arrange
    let http = spawn_description_server().await;
    let target = spawn_ssdp_responder(vec![
        samsung_reply(http, ""),
        router_reply(),
        samsung_reply(http, "EXT:\r\nBOOTID.UPNP.ORG: 7\r\n"),
    ])
    .await;
    let engine = DiscoveryEngine::new(settings(target, Duration::from_millis(1500)));

    // Act
    let events = collect(&engine).await;

    // Assert: Found once, Updated with the friendly name, Done last.
    let found: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DiscoveryEvent::Found(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].ip, "127.0.0.1");

    assert!(events.iter().any(|e| matches!(
        e,
        DiscoveryEvent::Updated(r) if r.name.as_deref() == Some("[TV] Living Room")
    )));

    let done_count = events
        .iter()
        .filter(|e| matches!(e, DiscoveryEvent::Done(_)))
        .count();
    assert_eq!(done_count, 1);
    let Some(DiscoveryEvent::Done(records)) = events.last() else {
        panic!("Done must be the final event, got {events:?}");
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model.as_deref(), Some("QE55Q80T"));
    assert_eq!(records[0].raw_headers.get("bootid.upnp.org"), Some("7"));
    assert_eq!(
        records[0].location_url.as_deref(),
        Some(format!("http://{http}/dmr.xml").as_str())
    );
}

#[tokio::test]
async fn test_enrichment_without_reemit_still_lands_in_done() {
    // Arrange
    let http = spawn_description_server().await;
    let target = spawn_ssdp_responder(vec![samsung_reply(http, "")]).await;
    let mut quiet = settings(target, Duration::from_millis(1500));
    quiet.reemit_on_enrichment = false;
    let engine = DiscoveryEngine::new(quiet);

    // Act
    let events = collect(&engine).await;

    // Assert
    assert!(!events.iter().any(|e| matches!(e, DiscoveryEvent::Updated(_))));
    let Some(DiscoveryEvent::Done(records)) = events.last() else {
        panic!("Done must be the final event");
    };
    assert_eq!(records[0].display_name(), "[TV] Living Room");
}

#[tokio::test]
async fn test_silent_network_waits_full_window_then_reports_nothing() {
    // Arrange: only a router answers.
    let target = spawn_ssdp_responder(vec![router_reply()]).await;
    let window = Duration::from_millis(400);
    let engine = DiscoveryEngine::new(settings(target, window));
    let started = Instant::now();

    // Act
    let records = engine.discover_all().await;

    // Assert
    assert!(records.is_empty());
    assert!(started.elapsed() >= window);
}

#[tokio::test]
async fn test_failed_search_still_waits_full_window_before_done() {
    // Arrange: a broadcast target without SO_BROADCAST makes send_to fail.
    let window = Duration::from_millis(400);
    let engine = DiscoveryEngine::new(settings("255.255.255.255:1900".parse().unwrap(), window));
    let started = Instant::now();

    // Act
    let events = collect(&engine).await;

    // Assert
    assert!(started.elapsed() >= window);
    assert!(matches!(events.as_slice(), [DiscoveryEvent::Done(records)] if records.is_empty()));
}

#[tokio::test]
async fn test_discovered_tv_is_flagged_when_session_is_live() {
    // Arrange: a session CONNECTED to the loopback TV.
    let store = Arc::new(MemoryStore::new());
    store.set(&token_key("127.0.0.1"), "9").unwrap();
    let session = SessionHandle::spawn(
        Arc::new(MockChannel::new()),
        store,
        SessionSettings::default(),
    );
    session.connect("127.0.0.1").await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        session.wait_until(|s| s.status == SessionStatus::Connected),
    )
    .await
    .expect("connected");

    let http = spawn_description_server().await;
    let target = spawn_ssdp_responder(vec![samsung_reply(http, "")]).await;
    let engine = DiscoveryEngine::new(settings(target, Duration::from_millis(800)));

    // Act
    let mut records = engine.discover_all().await;
    mark_connected(&mut records, &session.snapshot());

    // Assert
    assert_eq!(records.len(), 1);
    assert!(records[0].is_connected);
}

// ── Fallback probe ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_probe_returns_first_candidate_that_accepts() {
    // Arrange
    let ws = spawn_ws_listener().await;
    let probe = ProbeSettings {
        candidates: vec!["127.0.0.2".to_string(), "127.0.0.1".to_string()],
        port: ws.port(),
        timeout: Duration::from_millis(500),
    };

    // Act
    let winner = probe_first(&probe).await;

    // Assert
    assert_eq!(winner.as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_no_ssdp_answer_falls_back_to_probe() {
    // Arrange: a UDP socket that swallows the M-SEARCH.
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ws = spawn_ws_listener().await;
    let mut with_probe = settings(sink.local_addr().unwrap(), Duration::from_millis(300));
    with_probe.probe = Some(ProbeSettings {
        candidates: vec!["127.0.0.1".to_string()],
        port: ws.port(),
        timeout: Duration::from_millis(500),
    });
    let engine = DiscoveryEngine::new(with_probe);

    // Act
    let events = collect(&engine).await;

    // Assert
    assert_eq!(events.len(), 2, "got {events:?}");
    assert!(matches!(&events[0], DiscoveryEvent::Found(r) if r.ip == "127.0.0.1" && r.name.is_none()));
    assert!(matches!(&events[1], DiscoveryEvent::Done(r) if r.len() == 1));
}

//! Integration tests for the saved-TV lifecycle across restarts.
//!
//! Each "process" is a fresh session, store handle, and connection manager
//! over the same `state.toml`, so what one run persists is what the next run
//! reads back.
//!
//! ```text
//! run 1: connect_to_tv(ip) → TV confirms → token + identity on disk
//! run 2: start() → settle delay → connect(ip) with stored token → CONNECTED
//! run 3: forget_tv() → start() schedules nothing
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tvremote_controller::application::connection::ConnectionManager;
use tvremote_controller::application::session::{SessionHandle, SessionSettings};
use tvremote_controller::infrastructure::network::transport::mock::MockChannel;
use tvremote_controller::infrastructure::network::transport::ChannelEvent;
use tvremote_controller::infrastructure::storage::state::{
    token_key, KeyValueStore, TomlStateStore,
};
use tvremote_core::SessionStatus;

const TV: &str = "192.168.0.50";
const SETTLE: Duration = Duration::from_millis(50);

fn temp_state_file() -> PathBuf {
    std::env::temp_dir()
        .join(format!("tvremote-it-{}", uuid::Uuid::new_v4()))
        .join("state.toml")
}

/// One simulated process run over the state file at `path`.
fn launch(path: &Path) -> (ConnectionManager, Arc<MockChannel>, Arc<TomlStateStore>) {
    let store = Arc::new(TomlStateStore::open(path).expect("state file opens"));
    let channel = Arc::new(MockChannel::new());
    let session = SessionHandle::spawn(channel.clone(), store.clone(), SessionSettings::default());
    let manager = ConnectionManager::new(session, store.clone(), SETTLE);
    (manager, channel, store)
}

async fn wait_connected(manager: &ConnectionManager) {
    let mut info = manager.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        info.wait_for(|i| i.status == SessionStatus::Connected),
    )
    .await
    .expect("connected in time")
    .expect("manager alive");
}

#[tokio::test]
async fn test_paired_tv_reconnects_on_next_start_and_is_forgotten() {
    let path = temp_state_file();

    // Run 1: first-time pairing.
    {
        let (manager, channel, _store) = launch(&path);
        assert!(!manager.start());
        manager
            .connect_to_tv(TV, Some("Bedroom"))
            .await
            .expect("connect accepted");
        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.opened_urls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("channel opened");
        channel.inject(ChannelEvent::Message(
            r#"{"event":"ms.channel.connect","data":{"token":77001}}"#.to_string(),
        ));
        wait_connected(&manager).await;
        manager.disconnect().await.expect("disconnect");
    }

    // Run 2: auto-connect with the stored token.
    {
        let (manager, channel, store) = launch(&path);
        assert_eq!(store.get(&token_key(TV)).unwrap().as_deref(), Some("77001"));
        let identity = manager.saved_identity().unwrap().expect("identity saved");
        assert_eq!(identity.label(), "Bedroom");
        assert!(identity.auto_connect_enabled);

        assert!(manager.start());
        wait_connected(&manager).await;

        assert_eq!(channel.opened_urls().len(), 1);
        assert!(channel.opened_urls()[0].ends_with("&token=77001"));
        assert_eq!(manager.info().ip.as_deref(), Some(TV));

        manager.forget_tv().await.expect("forget");
        let mut info = manager.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            info.wait_for(|i| i.status == SessionStatus::Disconnected && i.ip.is_none()),
        )
        .await
        .expect("disconnected in time")
        .expect("manager alive");
    }

    // Run 3: nothing left to reconnect to.
    {
        let (manager, channel, store) = launch(&path);
        assert!(manager.saved_identity().unwrap().is_none());
        assert_eq!(store.get(&token_key(TV)).unwrap(), None);
        assert!(!manager.start());
        tokio::time::sleep(SETTLE * 4).await;
        assert!(channel.opened_urls().is_empty());
    }

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_disabling_auto_connect_survives_restart() {
    let path = temp_state_file();
    {
        let (manager, _channel, _store) = launch(&path);
        manager.save_connected_tv(TV, None).unwrap();
        manager.set_auto_connect(false).unwrap();
    }

    let (manager, channel, _store) = launch(&path);
    let identity = manager.saved_identity().unwrap().expect("identity saved");

    assert_eq!(identity.label(), TV);
    assert!(!identity.auto_connect_enabled);
    assert!(!manager.start());
    tokio::time::sleep(SETTLE * 4).await;
    assert!(channel.opened_urls().is_empty());

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

//! Persistent connection manager.
//!
//! Remembers the TV the user picked (IP, display name, auto-connect flag) in
//! the key-value store and reconnects to it once on startup, after a short
//! settle delay.  The delayed connect can be revoked until it fires.
//!
//! The manager also mirrors the session's status and IP into a
//! [`ConnectionInfo`] watch channel.  Only changes to those fields notify
//! subscribers; token or error updates on the session do not.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tvremote_core::{SavedIdentity, SessionSnapshot, SessionStatus};

use super::session::{SessionError, SessionHandle};
use crate::infrastructure::storage::state::{
    KeyValueStore, StoreError, AUTO_CONNECT_ENABLED, CONNECTED_TV_IP, CONNECTED_TV_NAME,
    CONNECTED_TV_TOKEN,
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Connection fields shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionInfo {
    pub status: SessionStatus,
    pub ip: Option<String>,
    pub awaiting_pairing_approval: bool,
}

impl From<&SessionSnapshot> for ConnectionInfo {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            status: snapshot.status,
            ip: snapshot.ip.clone(),
            awaiting_pairing_approval: snapshot.awaiting_pairing_approval,
        }
    }
}

pub struct ConnectionManager {
    session: SessionHandle,
    store: Arc<dyn KeyValueStore>,
    settle_delay: Duration,
    auto_connect: Mutex<Option<JoinHandle<()>>>,
    info: watch::Receiver<ConnectionInfo>,
    mirror: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn new(session: SessionHandle, store: Arc<dyn KeyValueStore>, settle_delay: Duration) -> Self {
        let mut snapshots = session.subscribe();
        let (info_tx, info_rx) = watch::channel(ConnectionInfo::from(&*snapshots.borrow()));

        let mirror = tokio::spawn(async move {
            loop {
                let next = ConnectionInfo::from(&*snapshots.borrow_and_update());
                info_tx.send_if_modified(|current| {
                    if *current != next {
                        *current = next;
                        true
                    } else {
                        false
                    }
                });
                if snapshots.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            session,
            store,
            settle_delay,
            auto_connect: Mutex::new(None),
            info: info_rx,
            mirror,
        }
    }

    /// Schedules a single reconnect to the saved TV after the settle delay.
    ///
    /// Returns `true` when a reconnect was scheduled.  Nothing is scheduled
    /// when no TV is saved, auto-connect is off, or the store cannot be read.
    pub fn start(&self) -> bool {
        let identity = match self.saved_identity() {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("no saved TV; skipping auto-connect");
                return false;
            }
            Err(e) => {
                warn!("cannot read saved TV: {e}");
                return false;
            }
        };
        if !identity.auto_connect_enabled {
            info!("auto-connect disabled for {}", identity.label());
            return false;
        }

        let session = self.session.clone();
        let delay = self.settle_delay;
        info!("auto-connecting to {} in {:?}", identity.label(), delay);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = session.connect(&identity.ip).await {
                warn!("auto-connect to {} failed: {e}", identity.ip);
            }
        });
        self.replace_auto_connect(Some(task));
        true
    }

    /// Revokes a scheduled auto-connect that has not fired yet.
    pub fn cancel_auto_connect(&self) {
        self.replace_auto_connect(None);
    }

    /// Saves `ip` as the selected TV and connects to it.
    ///
    /// A live session with a different TV is closed first.
    pub async fn connect_to_tv(&self, ip: &str, name: Option<&str>) -> Result<(), ConnectionError> {
        self.cancel_auto_connect();
        self.save_connected_tv(ip, name)?;

        let current = self.session.snapshot();
        if current.status.is_active() && current.ip.as_deref() != Some(ip) {
            info!("switching from {:?} to {ip}", current.ip);
            self.session.disconnect().await?;
        }
        self.session.connect(ip).await?;
        Ok(())
    }

    pub fn save_connected_tv(&self, ip: &str, name: Option<&str>) -> Result<(), ConnectionError> {
        self.store.set(CONNECTED_TV_IP, ip)?;
        match name.filter(|n| !n.is_empty()) {
            Some(name) => self.store.set(CONNECTED_TV_NAME, name)?,
            None => self.store.remove(CONNECTED_TV_NAME)?,
        }
        debug!("saved TV {ip}");
        Ok(())
    }

    /// Disconnects and removes the saved TV together with its pairing token.
    ///
    /// The auto-connect preference is kept.
    pub async fn forget_tv(&self) -> Result<(), ConnectionError> {
        self.cancel_auto_connect();
        self.session.disconnect().await?;

        let ip = self.store.get(CONNECTED_TV_IP)?;
        self.store.remove(CONNECTED_TV_IP)?;
        self.store.remove(CONNECTED_TV_NAME)?;
        self.store.remove(CONNECTED_TV_TOKEN)?;
        if let Some(ip) = ip {
            self.session.forget_token(&ip).await?;
            info!("forgot TV {ip}");
        }
        Ok(())
    }

    pub fn set_auto_connect(&self, enabled: bool) -> Result<(), ConnectionError> {
        self.store
            .set(AUTO_CONNECT_ENABLED, if enabled { "true" } else { "false" })?;
        if !enabled {
            self.cancel_auto_connect();
        }
        Ok(())
    }

    /// The saved TV, if any.  Auto-connect defaults to on when never set.
    pub fn saved_identity(&self) -> Result<Option<SavedIdentity>, ConnectionError> {
        let Some(ip) = self.store.get(CONNECTED_TV_IP)?.filter(|ip| !ip.is_empty()) else {
            return Ok(None);
        };
        let display_name = self.store.get(CONNECTED_TV_NAME)?.filter(|n| !n.is_empty());
        let auto_connect_enabled = self
            .store
            .get(AUTO_CONNECT_ENABLED)?
            .map_or(true, |v| v != "false");
        Ok(Some(SavedIdentity {
            ip,
            display_name,
            auto_connect_enabled,
        }))
    }

    /// Cancels any pending auto-connect and closes the session.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.cancel_auto_connect();
        self.session.disconnect().await?;
        Ok(())
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionInfo> {
        self.info.clone()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn replace_auto_connect(&self, task: Option<JoinHandle<()>>) {
        let mut slot = self.auto_connect.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = task;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.replace_auto_connect(None);
        self.mirror.abort();
    }
}

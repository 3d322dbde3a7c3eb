//! Pairing/session state machine.
//!
//! One actor task owns the session: its state, the open channel, and the
//! heartbeat timer.  Everything else talks to it through a cloneable
//! [`SessionHandle`] and observes it through a `watch` channel of
//! [`SessionSnapshot`]s.
//!
//! # Lifecycle
//!
//! ```text
//!  connect(ip) ─▶ CONNECTING ─┬─ Opened, token reused ───────────▶ CONNECTED
//!                             ├─ Opened, no token ─▶ (wait) ─┐
//!                             │                              ├─ ms.channel.connect ─▶ CONNECTED
//!                             └─ ms.channel.unauthorized ────┘    (token persisted)
//!
//!  Closed ─▶ DISCONNECTED        Error / ms.error / open failure ─▶ ERROR (last_error set)
//! ```
//!
//! While the TV shows its "Allow this device?" prompt the session stays in
//! CONNECTING with `awaiting_pairing_approval` set.  A token is persisted only
//! after the TV confirms with `ms.channel.connect`.
//!
//! The transport is opened in a child task so a `disconnect` during a slow
//! TLS handshake is handled immediately.  Each attempt carries a generation
//! number; results from an abandoned attempt are dropped, which closes their
//! socket.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tvremote_core::{
    remote_control_url, InboundEvent, OutboundMessage, Scheme, SessionSnapshot, SessionStatus,
};

use crate::infrastructure::network::transport::{
    ChannelEvent, ChannelHandle, ChannelSender, SecureChannel, TransportError,
};
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::state::{token_key, KeyValueStore, StoreError, CONNECTED_TV_TOKEN};

/// Errors returned by [`SessionHandle`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session with another TV is live; disconnect it first.
    #[error("a session with {active} is already active")]
    AlreadyActive { active: String },

    /// The session task has exited.
    #[error("session task has stopped")]
    Stopped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a key or frame send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the socket.  Delivery is not acknowledged by the TV.
    Sent,
    /// The session is not CONNECTED; nothing was written.
    NotConnected,
    /// The socket task exited before the frame could be queued.
    ChannelClosed,
}

/// Static parameters of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub app_name: String,
    pub secure_port: u16,
    pub heartbeat: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            app_name: config.remote.app_name.clone(),
            secure_port: config.session.secure_port,
            heartbeat: config.session.heartbeat_interval(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

enum Command {
    Connect {
        ip: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<SendOutcome>,
    },
    ForgetToken {
        ip: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

type OpenResult = (u64, Result<ChannelHandle, TransportError>);

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front end of the session actor.
///
/// The actor stops when the last handle is dropped, closing any open channel.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Spawns the session actor on the current Tokio runtime.
    pub fn spawn(
        channel: Arc<dyn SecureChannel>,
        store: Arc<dyn KeyValueStore>,
        settings: SessionSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (snap_tx, snap_rx) = watch::channel(SessionSnapshot::default());
        let (open_tx, open_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            channel,
            store,
            settings,
            commands: cmd_rx,
            open_results: open_rx,
            open_results_tx: open_tx,
            snapshot_tx: snap_tx,
            state: SessionSnapshot::default(),
            token_reused: false,
            attempt: 0,
            pending_open: None,
            sender: None,
            events: None,
            heartbeat: None,
        };
        tokio::spawn(actor.run());

        Self {
            commands: cmd_tx,
            snapshot: snap_rx,
        }
    }

    /// Starts a session with the TV at `ip`.
    ///
    /// Returns once the session is CONNECTING; watch the snapshot for the
    /// outcome.  Connecting again to the same IP while a session is live is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyActive`] when a session with another IP is live.
    pub async fn connect(&self, ip: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Connect {
            ip: ip.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Stopped)?
    }

    /// Closes the channel and clears in-memory session data.  Idempotent.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Disconnect { reply }).await?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    /// Writes `message` if, and only if, the session is CONNECTED.
    pub async fn send(&self, message: OutboundMessage) -> Result<SendOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { message, reply }).await?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    /// Removes the stored pairing token for `ip`.
    pub async fn forget_token(&self, ip: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ForgetToken {
            ip: ip.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Stopped)?
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Waits until `predicate` holds for the published snapshot.
    ///
    /// Returns the last snapshot if the actor stops first.
    pub async fn wait_until<F>(&self, mut predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let result = rx.wait_for(|s| predicate(s)).await.map(|s| s.clone());
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => rx.borrow().clone(),
        }
    }

    async fn request(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct SessionActor {
    channel: Arc<dyn SecureChannel>,
    store: Arc<dyn KeyValueStore>,
    settings: SessionSettings,
    commands: mpsc::Receiver<Command>,
    open_results: mpsc::UnboundedReceiver<OpenResult>,
    open_results_tx: mpsc::UnboundedSender<OpenResult>,
    snapshot_tx: watch::Sender<SessionSnapshot>,

    state: SessionSnapshot,
    /// The current attempt was started with a stored token.
    token_reused: bool,
    /// Generation of the current attempt.
    attempt: u64,
    pending_open: Option<JoinHandle<()>>,
    sender: Option<ChannelSender>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    heartbeat: Option<Interval>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((attempt, result)) = self.open_results.recv() => {
                    self.on_open_result(attempt, result);
                }
                event = next_event(&mut self.events) => self.on_channel_event(event),
                _ = next_tick(&mut self.heartbeat) => self.send_heartbeat(),
            }
        }
        self.teardown();
        debug!("session actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { ip, reply } => {
                let _ = reply.send(self.connect(ip));
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Send { message, reply } => {
                let _ = reply.send(self.send(&message));
            }
            Command::ForgetToken { ip, reply } => {
                let result = self.store.remove(&token_key(&ip)).map_err(SessionError::from);
                if result.is_ok() {
                    info!("forgot pairing token for {ip}");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn connect(&mut self, ip: String) -> Result<(), SessionError> {
        if self.state.status.is_active() {
            let active = self.state.ip.clone().unwrap_or_default();
            if active == ip {
                debug!("connect({ip}) ignored: session already {}", self.state.status);
                return Ok(());
            }
            return Err(SessionError::AlreadyActive { active });
        }

        let token = match self.store.get(&token_key(&ip)) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("could not read stored token for {ip}: {e}");
                None
            }
        };

        self.teardown();
        self.attempt += 1;
        self.token_reused = token.is_some();
        self.state = SessionSnapshot {
            ip: Some(ip.clone()),
            status: SessionStatus::Connecting,
            token: token.clone(),
            last_error: None,
            awaiting_pairing_approval: false,
        };
        self.publish();

        let url = remote_control_url(
            Scheme::Secure,
            &ip,
            self.settings.secure_port,
            &self.settings.app_name,
            token.as_deref(),
        );
        info!(
            "connecting to {ip} ({})",
            if self.token_reused { "stored token" } else { "pairing" }
        );

        let channel = Arc::clone(&self.channel);
        let results = self.open_results_tx.clone();
        let attempt = self.attempt;
        self.pending_open = Some(tokio::spawn(async move {
            let result = channel.open(&url, &ip).await;
            let _ = results.send((attempt, result));
        }));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.attempt += 1;
        self.teardown();
        if self.state != SessionSnapshot::default() {
            info!("disconnected");
        }
        self.token_reused = false;
        self.state = SessionSnapshot::default();
        self.publish();
    }

    fn send(&mut self, message: &OutboundMessage) -> SendOutcome {
        if self.state.status != SessionStatus::Connected {
            warn!("not connected; dropping {message:?}");
            return SendOutcome::NotConnected;
        }
        let Some(sender) = &self.sender else {
            return SendOutcome::NotConnected;
        };
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("could not encode frame: {e}");
                return SendOutcome::ChannelClosed;
            }
        };
        match sender.send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!("send failed: {e}");
                SendOutcome::ChannelClosed
            }
        }
    }

    fn on_open_result(&mut self, attempt: u64, result: Result<ChannelHandle, TransportError>) {
        if attempt != self.attempt || self.state.status != SessionStatus::Connecting {
            debug!("dropping result of abandoned attempt {attempt}");
            return;
        }
        self.pending_open = None;
        match result {
            Ok(handle) => {
                self.sender = Some(handle.sender);
                self.events = Some(handle.events);
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Opened) => {
                if self.token_reused {
                    self.set_status(SessionStatus::Connected);
                } else {
                    debug!("channel open; waiting for pairing confirmation");
                }
            }
            Some(ChannelEvent::Message(text)) => self.on_message(&text),
            Some(ChannelEvent::Closed { code, reason }) => {
                info!("channel closed by TV (code {code:?}): {reason}");
                self.closed();
            }
            Some(ChannelEvent::Error(message)) => self.fail(message),
            None => {
                debug!("channel event stream ended");
                self.closed();
            }
        }
    }

    fn on_message(&mut self, text: &str) {
        let event = match InboundEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("ignoring frame: {e}");
                return;
            }
        };

        match event {
            InboundEvent::ConnectConfirmed { token } => {
                if let Some(token) = token {
                    self.persist_token(&token);
                    self.state.token = Some(token);
                }
                self.state.awaiting_pairing_approval = false;
                self.set_status(SessionStatus::Connected);
            }
            InboundEvent::Unauthorized => {
                if self.state.status == SessionStatus::Connected && self.token_reused {
                    warn!("stored token was rejected; pairing again");
                    self.drop_stale_token();
                }
                info!("accept the pairing request shown on the TV");
                self.state.awaiting_pairing_approval = true;
                self.set_status(SessionStatus::Connecting);
            }
            InboundEvent::TvError { message } => self.fail(format!("TV error: {message}")),
            InboundEvent::Other(name) => debug!("ignoring event {name}"),
        }
    }

    fn persist_token(&self, token: &str) {
        let Some(ip) = self.state.ip.as_deref() else {
            return;
        };
        let per_ip = token_key(ip);
        for key in [per_ip.as_str(), CONNECTED_TV_TOKEN] {
            if let Err(e) = self.store.set(key, token) {
                warn!("could not persist pairing token: {e}");
            }
        }
        info!("paired with {ip}");
    }

    fn drop_stale_token(&mut self) {
        if let Some(ip) = self.state.ip.as_deref() {
            if let Err(e) = self.store.remove(&token_key(ip)) {
                warn!("could not remove stale token: {e}");
            }
        }
        self.state.token = None;
        self.token_reused = false;
    }

    fn send_heartbeat(&mut self) {
        if self.state.status != SessionStatus::Connected {
            return;
        }
        if let SendOutcome::Sent = self.send(&OutboundMessage::heartbeat()) {
            debug!("heartbeat sent");
        }
    }

    fn closed(&mut self) {
        self.teardown();
        self.token_reused = false;
        self.state.status = SessionStatus::Disconnected;
        self.state.token = None;
        self.state.awaiting_pairing_approval = false;
        self.publish();
    }

    fn fail(&mut self, message: String) {
        warn!("session error: {message}");
        self.teardown();
        self.token_reused = false;
        self.state.status = SessionStatus::Error;
        self.state.last_error = Some(message);
        self.state.awaiting_pairing_approval = false;
        self.publish();
    }

    fn set_status(&mut self, status: SessionStatus) {
        if status == SessionStatus::Connected && self.state.status != SessionStatus::Connected {
            let period = self.settings.heartbeat;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.heartbeat = Some(ticker);
            info!("connected to {}", self.state.ip.as_deref().unwrap_or("?"));
        } else if status != SessionStatus::Connected {
            self.heartbeat = None;
        }
        self.state.status = status;
        self.publish();
    }

    /// Closes the channel and stops timers without touching `state`.
    fn teardown(&mut self) {
        if let Some(open) = self.pending_open.take() {
            open.abort();
        }
        if let Some(sender) = self.sender.take() {
            sender.close();
        }
        self.events = None;
        self.heartbeat = None;
    }

    fn publish(&self) {
        let state = &self.state;
        self.snapshot_tx.send_if_modified(|current| {
            if current != state {
                *current = state.clone();
                true
            } else {
                false
            }
        });
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::transport::mock::MockChannel;
    use crate::infrastructure::storage::state::{MemoryStore, MockKeyValueStore};
    use tokio_test::assert_ok;
    use tvremote_core::RemoteKey;

    const IP: &str = "192.168.1.62";

    fn spawn_with(store: Arc<dyn KeyValueStore>) -> (SessionHandle, Arc<MockChannel>) {
        let channel = Arc::new(MockChannel::new());
        let handle = SessionHandle::spawn(channel.clone(), store, SessionSettings::default());
        (handle, channel)
    }

    async fn wait_status(handle: &SessionHandle, status: SessionStatus) -> SessionSnapshot {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_until(|s| s.status == status))
            .await
            .expect("status reached in time")
    }

    async fn wait_opened(channel: &MockChannel, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.opened_urls().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("open attempted in time");
    }

    #[tokio::test]
    async fn test_connect_without_token_waits_for_confirmation() {
        // Arrange
        let (session, channel) = spawn_with(Arc::new(MemoryStore::new()));

        // Act
        assert_ok!(session.connect(IP).await);
        wait_opened(&channel, 1).await;

        // Assert
        let snap = wait_status(&session, SessionStatus::Connecting).await;
        assert_eq!(snap.ip.as_deref(), Some(IP));
        assert!(snap.token.is_none());
        assert!(!channel.opened_urls()[0].contains("token="));
        assert_eq!(channel.opened_hosts(), vec![IP.to_string()]);
    }

    #[tokio::test]
    async fn test_stored_token_read_failure_falls_back_to_pairing() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| Err(StoreError::Poisoned));
        let (session, channel) = spawn_with(Arc::new(store));

        // Act
        assert_ok!(session.connect(IP).await);
        wait_opened(&channel, 1).await;

        // Assert
        assert!(session.snapshot().token.is_none());
        assert!(!channel.opened_urls()[0].contains("token="));
    }

    #[tokio::test]
    async fn test_token_persist_failure_keeps_session_up() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_set()
            .times(2)
            .returning(|_, _| Err(StoreError::Poisoned));
        let (session, channel) = spawn_with(Arc::new(store));
        assert_ok!(session.connect(IP).await);
        wait_opened(&channel, 1).await;

        // Act
        channel.inject(ChannelEvent::Message(
            r#"{"event":"ms.channel.connect","data":{"token":"42"}}"#.to_string(),
        ));

        // Assert
        let snap = wait_status(&session, SessionStatus::Connected).await;
        assert_eq!(snap.token.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_not_connected() {
        let (session, channel) = spawn_with(Arc::new(MemoryStore::new()));

        let outcome = session
            .send(OutboundMessage::click(RemoteKey::Mute))
            .await
            .unwrap();

        assert_eq!(outcome, SendOutcome::NotConnected);
        assert!(channel.opened_urls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_harmless() {
        let (session, _channel) = spawn_with(Arc::new(MemoryStore::new()));
        assert_ok!(session.disconnect().await);
        assert_ok!(session.disconnect().await);
        assert_eq!(session.snapshot(), SessionSnapshot::default());
    }

    #[tokio::test]
    async fn test_settings_follow_config() {
        let mut config = AppConfig::default();
        config.remote.app_name = "Den".into();
        config.session.heartbeat_secs = 10;

        let settings = SessionSettings::from_config(&config);

        assert_eq!(settings.app_name, "Den");
        assert_eq!(settings.secure_port, 8002);
        assert_eq!(settings.heartbeat, Duration::from_secs(10));
    }
}

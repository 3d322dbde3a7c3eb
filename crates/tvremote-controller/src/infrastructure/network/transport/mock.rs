//! Mock secure channel for unit and integration tests.
//!
//! `MockChannel` never touches the network.  Each `open` is recorded, and the
//! returned handle is wired to in-memory queues so a test can:
//!
//! - read back every frame the session wrote (`sent`),
//! - push socket events into the session as if the TV sent them (`inject`),
//! - make the next `open` fail (`fail_next_open`) or hang until released
//!   (`hold_opens` / `release_opens`).
//!
//! ```ignore
//! let channel = Arc::new(MockChannel::new());
//! let session = SessionHandle::spawn(channel.clone(), store, settings);
//! session.connect("10.0.0.20").await?;
//! channel.inject(ChannelEvent::Message(r#"{"event":"ms.channel.connect"}"#.into()));
//! assert_eq!(channel.sent().len(), 0);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::{ChannelEvent, ChannelHandle, ChannelSender, Outgoing, SecureChannel, TransportError};

/// One recorded `open` call and the test's end of its queues.
struct MockConnection {
    url: String,
    expected_host: String,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: Vec<String>,
    closed: bool,
}

impl MockConnection {
    /// Moves queued outbound frames into `sent`.
    fn drain(&mut self) {
        loop {
            match self.outbound.try_recv() {
                Ok(Outgoing::Text(text)) => self.sent.push(text),
                Ok(Outgoing::Close) => self.closed = true,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }
}

/// Records opens and sends; lets tests inject socket events.
#[derive(Default)]
pub struct MockChannel {
    connections: Mutex<Vec<MockConnection>>,
    fail_next: Mutex<Option<String>>,
    hold: AtomicBool,
    released: Notify,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs passed to `open`, in call order.
    pub fn opened_urls(&self) -> Vec<String> {
        self.lock().iter().map(|c| c.url.clone()).collect()
    }

    /// Expected hosts passed to `open`, in call order.
    pub fn opened_hosts(&self) -> Vec<String> {
        self.lock().iter().map(|c| c.expected_host.clone()).collect()
    }

    /// Frames written on the most recent connection.
    pub fn sent(&self) -> Vec<String> {
        let mut conns = self.lock();
        match conns.last_mut() {
            Some(conn) => {
                conn.drain();
                conn.sent.clone()
            }
            None => Vec::new(),
        }
    }

    /// Frames written across every connection.
    pub fn all_sent(&self) -> Vec<String> {
        let mut conns = self.lock();
        conns
            .iter_mut()
            .flat_map(|c| {
                c.drain();
                c.sent.clone()
            })
            .collect()
    }

    /// `true` once the session closed or dropped the most recent connection.
    pub fn last_closed(&self) -> bool {
        let mut conns = self.lock();
        match conns.last_mut() {
            Some(conn) => {
                conn.drain();
                conn.closed
            }
            None => false,
        }
    }

    /// Delivers `event` on the most recent connection.
    ///
    /// Returns `false` when nothing was opened or the session stopped
    /// listening.
    pub fn inject(&self, event: ChannelEvent) -> bool {
        self.lock()
            .last()
            .map(|c| c.events.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Makes the next `open` fail with a handshake-style error.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(message.into());
        }
    }

    /// Makes subsequent `open` calls wait until [`release_opens`](Self::release_opens).
    pub fn hold_opens(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release_opens(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MockConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SecureChannel for MockChannel {
    async fn open(&self, url: &str, expected_host: &str) -> Result<ChannelHandle, TransportError> {
        while self.hold.load(Ordering::SeqCst) {
            let released = self.released.notified();
            if !self.hold.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();

        let failure = self
            .fail_next
            .lock()
            .map(|mut slot| slot.take())
            .unwrap_or(None);

        self.lock().push(MockConnection {
            url: url.to_string(),
            expected_host: expected_host.to_string(),
            outbound: out_rx,
            events: ev_tx.clone(),
            sent: Vec::new(),
            closed: false,
        });

        if let Some(message) = failure {
            return Err(TransportError::Handshake(
                tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    message,
                )),
            ));
        }

        let _ = ev_tx.send(ChannelEvent::Opened);
        Ok(ChannelHandle {
            sender: ChannelSender::new(out_tx),
            events: ev_rx,
        })
    }
}

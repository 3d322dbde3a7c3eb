//! Command dispatcher: one remote key press at a time.
//!
//! Key presses are fire-and-forget.  When the session is not CONNECTED the
//! press is dropped with a warning and [`SendOutcome::NotConnected`]; nothing
//! is queued for later.

use async_trait::async_trait;
use tracing::warn;
use tvremote_core::{OutboundMessage, RemoteKey, SessionStatus};

use super::session::{SendOutcome, SessionHandle};

/// Anything that can press a remote key.
///
/// The channel sequencer depends on this seam rather than on the session, so
/// its timing can be tested with a recording sink.
#[async_trait]
pub trait KeySink: Send + Sync {
    async fn press(&self, key: RemoteKey) -> SendOutcome;

    /// Whether a press made now would reach a TV.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Sends key clicks through the session.
#[derive(Clone)]
pub struct CommandDispatcher {
    session: SessionHandle,
}

impl CommandDispatcher {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Sends one `Click` of `key`.
    pub async fn send_key(&self, key: RemoteKey) -> SendOutcome {
        match self.session.send(OutboundMessage::click(key)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("cannot send {key}: {e}");
                SendOutcome::NotConnected
            }
        }
    }

    pub async fn volume_up(&self) -> SendOutcome {
        self.send_key(RemoteKey::VolumeUp).await
    }

    pub async fn volume_down(&self) -> SendOutcome {
        self.send_key(RemoteKey::VolumeDown).await
    }

    pub async fn mute(&self) -> SendOutcome {
        self.send_key(RemoteKey::Mute).await
    }
}

#[async_trait]
impl KeySink for CommandDispatcher {
    async fn press(&self, key: RemoteKey) -> SendOutcome {
        self.send_key(key).await
    }

    fn is_ready(&self) -> bool {
        self.session.snapshot().status == SessionStatus::Connected
    }
}

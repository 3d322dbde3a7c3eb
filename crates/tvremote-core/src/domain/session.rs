//! Session status and the persisted TV identity.

use serde::{Deserialize, Serialize};

/// Lifecycle of the remote-control session.
///
/// ```text
///   Disconnected ──connect──▶ Connecting ──confirmed──▶ Connected
///        ▲                        │  ▲                      │
///        │                        │  └───unauthorized───────┤
///        └────────closed──────────┴──────────────────────────┤
///                                 └──error──▶ Error ◀────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionStatus {
    /// `true` while an attempt is in flight or the session is usable.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "DISCONNECTED",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Read-only view of the session, published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// IP of the TV the session targets; `None` when idle.
    pub ip: Option<String>,
    pub status: SessionStatus,
    /// Pairing token in use, if any.
    pub token: Option<String>,
    /// Reason for the last failure.  Set only in [`SessionStatus::Error`].
    pub last_error: Option<String>,
    /// The TV is showing its "Allow this device?" prompt.
    pub awaiting_pairing_approval: bool,
}

impl SessionSnapshot {
    /// `true` when key presses will be transmitted.
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// `true` when this snapshot is a live session with `ip`.
    pub fn is_connected_to(&self, ip: &str) -> bool {
        self.is_connected() && self.ip.as_deref() == Some(ip)
    }
}

/// The TV the user chose to remember across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedIdentity {
    pub ip: String,
    pub display_name: Option<String>,
    pub auto_connect_enabled: bool,
}

impl SavedIdentity {
    /// Label shown to the user; falls back to the IP.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.ip.as_str())
    }
}

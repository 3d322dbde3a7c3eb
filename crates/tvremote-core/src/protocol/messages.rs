//! JSON envelopes exchanged on the remote-control channel.
//!
//! Outbound (controller → TV):
//! ```text
//! {"method":"ms.remote.control","params":{"Cmd":"Click","DataOfCmd":"KEY_7","Option":"false","TypeOfRemote":"SendRemoteKey"}}
//! {"method":"ms.channel.emit","params":{"event":"ping"}}
//! ```
//!
//! Inbound (TV → controller) frames carry an `event` field.  Some firmware
//! answers the pairing handshake with `"method":"ms.channel.connect"` instead,
//! which is read as a connect confirmation when it carries a token.  Events
//! that do not drive the session are reported as [`InboundEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::key::RemoteKey;

/// Event name the TV sends once the client is admitted.
pub const EVENT_CONNECT: &str = "ms.channel.connect";
/// Event name the TV sends while the client is not (yet) allowed.
pub const EVENT_UNAUTHORIZED: &str = "ms.channel.unauthorized";
/// Event name of a TV-side failure report.
pub const EVENT_ERROR: &str = "ms.error";

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The frame is JSON but has neither an `event` nor a usable `method`.
    #[error("frame has no event field")]
    MissingEvent,
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Parameters of a `ms.remote.control` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteControlParams {
    pub cmd: String,
    pub data_of_cmd: RemoteKey,
    /// Always the string `"false"`, not a JSON boolean.
    pub option: String,
    pub type_of_remote: String,
}

/// Parameters of a `ms.channel.emit` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitParams {
    pub event: String,
}

/// A message the controller sends to the TV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum OutboundMessage {
    #[serde(rename = "ms.remote.control")]
    RemoteControl(RemoteControlParams),
    #[serde(rename = "ms.channel.emit")]
    ChannelEmit(EmitParams),
}

impl OutboundMessage {
    /// A single press-and-release of `key`.
    pub fn click(key: RemoteKey) -> Self {
        OutboundMessage::RemoteControl(RemoteControlParams {
            cmd: "Click".to_string(),
            data_of_cmd: key,
            option: "false".to_string(),
            type_of_remote: "SendRemoteKey".to_string(),
        })
    }

    /// Keep-alive ping.
    pub fn heartbeat() -> Self {
        OutboundMessage::ChannelEmit(EmitParams {
            event: "ping".to_string(),
        })
    }

    /// Serializes to the text frame sent on the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidJson`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// A decoded frame from the TV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `ms.channel.connect`: the TV admitted this client.  `token` is present
    /// the first time a client is approved.
    ConnectConfirmed { token: Option<String> },
    /// `ms.channel.unauthorized`: the TV is waiting for the user to allow us.
    Unauthorized,
    /// `ms.error`: the TV refused or aborted the session.
    TvError { message: String },
    /// Any other event name.
    Other(String),
}

impl InboundEvent {
    /// Decodes one text frame.
    ///
    /// The token in `data.token` may arrive as a string or a number; either is
    /// returned as a string.  An empty token counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the frame is not JSON or names no event.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame)?;
        let Some(event) = value.get("event").and_then(Value::as_str) else {
            return match value.get("method").and_then(Value::as_str) {
                Some(EVENT_CONNECT) => match token_of(&value) {
                    Some(token) => Ok(InboundEvent::ConnectConfirmed { token: Some(token) }),
                    None => Ok(InboundEvent::Other(EVENT_CONNECT.to_string())),
                },
                _ => Err(ProtocolError::MissingEvent),
            };
        };

        let parsed = match event {
            EVENT_CONNECT => InboundEvent::ConnectConfirmed {
                token: token_of(&value),
            },
            EVENT_UNAUTHORIZED => InboundEvent::Unauthorized,
            EVENT_ERROR => InboundEvent::TvError {
                message: error_message(&value),
            },
            other => InboundEvent::Other(other.to_string()),
        };
        Ok(parsed)
    }
}

/// `data.token` as a non-empty string.
fn token_of(value: &Value) -> Option<String> {
    value
        .get("data")
        .and_then(|d| d.get("token"))
        .and_then(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|t| !t.is_empty())
}

/// Best-effort text of an `ms.error` payload.
fn error_message(value: &Value) -> String {
    match value.get("data") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Object(data)) => data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(data.clone()).to_string()),
        _ => "TV reported an error".to_string(),
    }
}

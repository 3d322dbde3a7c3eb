//! Endpoint URL for the TV's remote-control channel.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Path of the remote-control channel on both the plain and secure ports.
pub const REMOTE_CONTROL_PATH: &str = "/api/v2/channels/samsung.remote.control";

/// WebSocket scheme: `wss` for sessions, `ws` for the discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Secure,
    Plain,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Secure => "wss",
            Scheme::Plain => "ws",
        }
    }
}

/// Builds `<scheme>://<host>:<port>/api/v2/channels/samsung.remote.control?name=…[&token=…]`.
///
/// The TV displays `app_name` in its pairing prompt; it travels base64-encoded
/// and then URL-encoded.  `token` is URL-encoded when present.
///
/// ```rust
/// use tvremote_core::{remote_control_url, Scheme};
///
/// let url = remote_control_url(Scheme::Secure, "192.168.1.62", 8002, "Remote", Some("123"));
/// assert_eq!(
///     url,
///     "wss://192.168.1.62:8002/api/v2/channels/samsung.remote.control?name=UmVtb3Rl&token=123"
/// );
/// ```
pub fn remote_control_url(
    scheme: Scheme,
    host: &str,
    port: u16,
    app_name: &str,
    token: Option<&str>,
) -> String {
    let name = urlencoding::encode(&STANDARD.encode(app_name)).into_owned();
    let mut url = format!(
        "{}://{}:{}{}?name={}",
        scheme.as_str(),
        host,
        port,
        REMOTE_CONTROL_PATH,
        name
    );
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}

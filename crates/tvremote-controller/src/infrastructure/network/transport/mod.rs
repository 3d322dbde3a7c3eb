//! Secure channel adapter: a WebSocket to the TV's remote-control endpoint.
//!
//! The session state machine talks to the TV through the narrow
//! [`SecureChannel`] seam.  An opened channel is a [`ChannelHandle`]: a
//! cloneable [`ChannelSender`] for outbound text frames, and an event
//! receiver that yields, in socket order:
//!
//! ```text
//! Opened ─▶ Message(text)* ─▶ Closed { code, reason } | Error(message)
//! ```
//!
//! # TLS
//!
//! TVs serve a self-signed certificate on port 8002, so there is no CA to
//! check against.  [`WssChannel`] instead pins the connection to the host it
//! dialed: any certificate chain is accepted, but only when the TLS server
//! name equals the expected host.  Handshake signatures are still verified,
//! so the peer must hold the private key of the certificate it presents.
//!
//! Heartbeats are not the adapter's job; the session sends them.

pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector, WebSocketStream};
use tracing::{debug, warn};

/// Errors raised while opening or using a channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The expected host is not a valid DNS name or IP address.
    #[error("invalid host name: {0:?}")]
    InvalidHost(String),

    /// The TLS client configuration could not be built.
    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    /// TCP connect, TLS, or the WebSocket upgrade failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// The socket task has already exited.
    #[error("channel is closed")]
    Closed,
}

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Instruction for the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Cloneable write half of an open channel.
///
/// When every sender is dropped the socket task closes the connection.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { tx }
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the socket task has exited.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    /// Asks the socket task to send a close frame and exit.
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

/// An open channel: the write half plus the ordered event stream.
#[derive(Debug)]
pub struct ChannelHandle {
    pub sender: ChannelSender,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens a message channel to `url`, pinning TLS identity to `expected_host`.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    async fn open(&self, url: &str, expected_host: &str) -> Result<ChannelHandle, TransportError>;
}

// ── WebSocket adapter ─────────────────────────────────────────────────────────

/// [`SecureChannel`] over tokio-tungstenite and rustls (ring provider).
///
/// `wss://` URLs use the host-pinned TLS configuration; `ws://` URLs connect
/// in plaintext.
#[derive(Debug, Clone, Default)]
pub struct WssChannel;

impl WssChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecureChannel for WssChannel {
    async fn open(&self, url: &str, expected_host: &str) -> Result<ChannelHandle, TransportError> {
        let connector = if url.starts_with("wss://") {
            Some(Connector::Rustls(Arc::new(pinned_client_config(expected_host)?)))
        } else {
            None
        };

        let (ws, _response) =
            tokio_tungstenite::connect_async_tls_with_config(url, None, false, connector).await?;
        debug!("channel open to {expected_host}");
        Ok(spawn_socket_task(ws))
    }
}

/// Builds a client config that trusts whatever `expected_host` presents.
///
/// # Errors
///
/// Returns [`TransportError::InvalidHost`] if `expected_host` cannot be a TLS
/// server name, or [`TransportError::Tls`] if the provider rejects the
/// default protocol versions.
pub fn pinned_client_config(expected_host: &str) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinnedHostVerifier::new(expected_host, Arc::clone(&provider))?;
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts any certificate for exactly one server name.
#[derive(Debug)]
pub struct PinnedHostVerifier {
    expected: ServerName<'static>,
    provider: Arc<CryptoProvider>,
}

impl PinnedHostVerifier {
    pub fn new(expected_host: &str, provider: Arc<CryptoProvider>) -> Result<Self, TransportError> {
        let expected = ServerName::try_from(expected_host.to_string())
            .map_err(|_| TransportError::InvalidHost(expected_host.to_string()))?;
        Ok(Self { expected, provider })
    }
}

impl ServerCertVerifier for PinnedHostVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if server_name.to_owned() == self.expected {
            Ok(ServerCertVerified::assertion())
        } else {
            warn!(
                "refusing TLS peer {:?}: expected {:?}",
                server_name, self.expected
            );
            Err(rustls::Error::General(format!(
                "server name {server_name:?} does not match pinned host"
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Socket task ───────────────────────────────────────────────────────────────

/// Moves `ws` into a task that forwards frames both ways.
///
/// The first event is always [`ChannelEvent::Opened`].  The task ends after
/// reporting `Closed` or `Error`, or silently when the local side closes.
pub fn spawn_socket_task<S>(ws: WebSocketStream<S>) -> ChannelHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let _ = ev_tx.send(ChannelEvent::Opened);

    tokio::spawn(async move {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = sink.send(WsMessage::Text(text)).await {
                            let _ = ev_tx.send(ChannelEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        debug!("channel closed locally");
                        break;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = ev_tx.send(ChannelEvent::Message(text));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        let _ = ev_tx.send(ChannelEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = ev_tx.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = ev_tx.send(ChannelEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                },
            }
        }
    });

    ChannelHandle {
        sender: ChannelSender::new(out_tx),
        events: ev_rx,
    }
}

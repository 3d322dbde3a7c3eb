//! Protocol module containing the JSON envelopes and endpoint URL builder.

pub mod endpoint;
pub mod messages;

pub use endpoint::{remote_control_url, Scheme, REMOTE_CONTROL_PATH};
pub use messages::{InboundEvent, OutboundMessage, ProtocolError};

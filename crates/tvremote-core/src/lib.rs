//! # tvremote-core
//!
//! Shared library for the Samsung TV LAN remote containing the domain
//! entities and the JSON wire protocol spoken on the TV's remote-control
//! channel.
//!
//! This crate has zero dependencies on sockets, timers, or the file system.
//! Everything that touches the network lives in `tvremote-controller`.
//!
//! # Architecture overview
//!
//! - **`domain`** – The data model: remote keys, discovery records, the
//!   session status snapshot, the saved TV identity, and the A/B channel test
//!   plan.
//!
//! - **`protocol`** – How a key press becomes bytes on the wire.  Outbound
//!   messages are small JSON envelopes (`ms.remote.control`,
//!   `ms.channel.emit`); inbound frames are JSON envelopes carrying an `event`
//!   field such as `ms.channel.connect` or `ms.channel.unauthorized`.  The
//!   module also builds the `wss://` endpoint URL with the base64 app name and
//!   the optional pairing token.

pub mod domain;
pub mod protocol;

pub use domain::discovery::{DiscoveryRecord, SsdpHeaders};
pub use domain::key::{KeyParseError, RemoteKey};
pub use domain::plan::{ChannelTestPlan, PlanError, TestPhase};
pub use domain::session::{SavedIdentity, SessionSnapshot, SessionStatus};
pub use protocol::endpoint::{remote_control_url, Scheme};
pub use protocol::messages::{InboundEvent, OutboundMessage, ProtocolError};

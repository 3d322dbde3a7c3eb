//! Network infrastructure for the controller.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Sends an SSDP `M-SEARCH`, collects Samsung TV
//!   responses, enriches them from the UPnP device description, and reports
//!   progress on an async channel.
//!
//! - **`probe`** – Fallback used by discovery when SSDP is silent: tries a
//!   WebSocket handshake on a fixed list of common LAN addresses.
//!
//! - **`transport`** – The secure WebSocket channel to a TV (`wss://`, port
//!   8002) behind the `SecureChannel` trait, plus an in-memory mock.

pub mod discovery;
pub mod probe;
pub mod transport;

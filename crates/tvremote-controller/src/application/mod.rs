//! Application layer for the controller.
//!
//! Holds the session state machine and the services built on top of it.  Each
//! stateful component is a Tokio actor owned by a cloneable handle; callers
//! never share mutable state with it directly.
//!
//! - **`session`** – pairing and connection state machine for one TV.
//! - **`dispatcher`** – single remote key presses.
//! - **`sequencer`** – timed digit entry and A/B channel tests.
//! - **`connection`** – saved TV identity and auto-connect on startup.

pub mod connection;
pub mod dispatcher;
pub mod sequencer;
pub mod session;

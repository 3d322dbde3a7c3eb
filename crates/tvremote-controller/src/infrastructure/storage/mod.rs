//! Storage infrastructure: configuration file and persisted session state.
//!
//! - `config` reads the user-editable TOML configuration, falling back to
//!   defaults on first run.
//! - `state` holds what the application writes on its own: pairing tokens
//!   and the remembered TV.  It lives in `state.toml` next to the config so
//!   that hand edits to the config are never overwritten.

pub mod config;
pub mod state;

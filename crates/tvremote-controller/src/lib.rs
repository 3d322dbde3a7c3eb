//! Samsung TV remote controller library.
//!
//! Discovery, pairing, and remote-key control of a Samsung Smart TV over the
//! local network.  The `tvremote` binary in `main.rs` is a thin CLI on top.

pub mod application;
pub mod infrastructure;

//! Infrastructure layer for the controller.
//!
//! Contains the adapters that touch the outside world: UDP and WebSocket
//! sockets, and the file system.
//!
//! **Dependency rule**: the application layer reaches this layer only through
//! the `SecureChannel` and `KeyValueStore` traits, so tests can swap in the
//! mock channel and the in-memory store.

pub mod network;
pub mod storage;

//! Domain entities for the TV remote.
//!
//! Pure data types with no infrastructure dependencies.  Code in the
//! controller crate (application and infrastructure layers) depends on these
//! types, never the other way around.

/// Discovery records and SSDP header sets.
pub mod discovery;

/// The closed set of remote keys the controller can send.
pub mod key;

/// The scripted A/B channel test plan.
pub mod plan;

/// Session status, read-only snapshots, and the saved TV identity.
pub mod session;

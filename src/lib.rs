//! GPU command wire: a client that serializes API calls, a server that
//! replays them on a native implementation, and the transport between them.
//!
//! The runtimes live in [`gpuwire_core`] and are re-exported here. The codec
//! and transport crates are available as [`protocol`] and [`ipc`].

pub use gpuwire_core::*;
pub use gpuwire_ipc as ipc;
pub use gpuwire_protocol as protocol;

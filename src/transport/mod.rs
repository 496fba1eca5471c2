//! # Transport Layer
//!
//! Moves frames between peers over TCP and finds servers over UDP.
//!
//! ## Components
//! - **Socket**: the synchronous endpoint applications drive with `tick()`
//! - **Channel**: one connection with its reader and writer tasks
//! - **Discovery**: UDP broadcast beacons and the matching listener
//! - **Liveness**: heartbeat and eviction timing
//!
//! ## Failure handling
//! A failed read or write tears down that channel only. Protocol violations
//! are logged at error level and counted before the channel is closed.

pub mod channel;
pub mod discovery;
pub mod liveness;
mod server;
pub mod socket;

pub use socket::{ConnectTarget, Socket};

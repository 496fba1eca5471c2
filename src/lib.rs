//! # peerlink
//!
//! Peer-to-peer packet transport. A process can accept remotes as a
//! **server**, connect out as a **remote**, or both. Typed packets travel as
//! length-prefixed compressed frames over TCP; dead peers are evicted through
//! heartbeats; servers on the local network are found through UDP broadcast.
//!
//! ## Quick start
//! 1. Define packet types implementing [`Packet`] and register them, in the
//!    same order on every peer, in a shared [`PacketRegistry`].
//! 2. Create a [`Socket`] per endpoint and `start` a server and/or `connect`.
//! 3. Call [`Socket::tick`] from your control loop; it performs received
//!    packets and keeps the connection alive.
//!
//! ## Modules
//! - [`config`]: TOML/env configuration with validation
//! - [`core`]: peer ids, the packet trait, body helpers and the frame codec
//! - [`protocol`]: packet registry and builtin packets
//! - [`transport`]: sockets, channels, discovery and liveness
//! - [`utils`]: compression, logging, metrics and timeouts
//! - [`error`]: the crate error type

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::packet::{Incoming, Packet, PacketContext};
pub use crate::core::peer_id::PeerId;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::registry::{PacketRegistry, PacketTypeId};
pub use crate::transport::socket::{ConnectTarget, Socket};

//! # Packet Protocol
//!
//! Type registration and the packets every peer understands.
//!
//! ## Components
//! - **Registry**: maps packet types to sequential wire ids and back
//! - **Builtin**: `Heartbeat` (id 0) and `Text` (id 1)
//!
//! ## Compatibility
//! Ids follow registration order. Peers that register different packet sets,
//! or the same set in a different order, will misread each other. The
//! registry fingerprint makes such a mismatch visible in the logs.

pub mod builtin;
pub mod registry;

pub use builtin::{Heartbeat, Text};
pub use registry::{PacketRegistry, PacketTypeId};

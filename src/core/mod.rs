//! # Core Protocol Components
//!
//! Peer identity, packet traits, body helpers and frame codec.
//!
//! ## Components
//! - **PeerId**: 128-bit connection identifier
//! - **Packet**: trait implemented by every application packet type
//! - **Wire**: checked little-endian body read/write helpers
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(4, i32 LE)] [compressed( [TypeId(4, u32 LE)] [Body(N)] )]
//! ```
//!
//! ## Limits
//! - Uncompressed type id + body: 32767 bytes
//! - Compressed frame accepted from the wire: 64 KiB
//! - Length validation before allocation

pub mod codec;
pub mod packet;
pub mod peer_id;
pub mod wire;

pub use codec::PacketCodec;
pub use packet::{Incoming, Packet, PacketContext};
pub use peer_id::PeerId;
pub use wire::{WireRead, WireWrite};

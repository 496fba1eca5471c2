//! # Packets
//!
//! A packet is a typed unit of application data. Each type:
//! - has a stable, source-controlled name used to assign its wire type id
//! - serialises its body with [`Packet::write`]
//! - rebuilds itself from a default instance with [`Packet::read`]
//! - runs its effect on the receiving side with [`Packet::perform`]
//!
//! Packets are moved around as `Box<dyn Packet>`; received ones arrive as
//! [`Incoming`], which carries the [`PeerId`] of the channel they came from.

use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::core::peer_id::PeerId;
use crate::error::Result;

/// Upcast helper so a `dyn Packet` can be downcast to its concrete type
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Operations a packet may use while it is being performed.
///
/// Implemented by [`Socket`](crate::transport::Socket).
pub trait PacketContext {
    /// Refresh the liveness clock of a server-side channel
    fn hold_alive(&self, peer: PeerId);

    fn send_to_server(&self, packet: &dyn Packet) -> Result<()>;

    fn send_to_remote(&self, peer: PeerId, packet: &dyn Packet) -> Result<()>;

    fn send_to_remotes(&self, packet: &dyn Packet) -> Result<()>;
}

/// A typed, serialisable unit of data exchanged between peers.
///
/// Both peers must register the same packet types in the same order; see
/// [`PacketRegistry`](crate::protocol::PacketRegistry).
pub trait Packet: AsAny + Send + Sync + fmt::Debug {
    /// Stable name identifying this type in the registry
    fn name(&self) -> &'static str;

    /// Serialise the body (without the type id)
    fn write(&self, buf: &mut BytesMut) -> Result<()>;

    /// Fill `self` from a body produced by [`write`](Packet::write)
    fn read(&mut self, buf: &mut Bytes) -> Result<()>;

    /// Run this packet's effect on the receiving side
    fn perform(&self, sender: PeerId, ctx: &dyn PacketContext) -> Result<()> {
        let _ = (sender, ctx);
        Ok(())
    }
}

impl<'a> dyn Packet + 'a {
    /// Borrow the concrete packet if it is a `T`
    pub fn downcast_ref<T: Packet + 'static>(&self) -> Option<&T> {
        <dyn Packet + 'a as AsAny>::as_any(self).downcast_ref::<T>()
    }

    pub fn is<T: Packet + 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

/// A decoded packet tagged with the channel it arrived on
pub struct Incoming {
    pub sender: PeerId,
    pub packet: Box<dyn Packet>,
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("sender", &format_args!("{}", self.sender))
            .field("packet", &self.packet)
            .finish()
    }
}

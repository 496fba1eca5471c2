//! Packets every registry created with `PacketRegistry::new()` knows about.

use bytes::{Bytes, BytesMut};
use tracing::info;

use crate::core::packet::{Packet, PacketContext};
use crate::core::peer_id::PeerId;
use crate::core::wire::{WireRead, WireWrite};
use crate::error::Result;

/// Sent by a remote every heartbeat interval. Keeps its server channel alive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat;

impl Heartbeat {
    pub const NAME: &'static str = "peerlink.heartbeat";
}

impl Packet for Heartbeat {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn write(&self, _buf: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _buf: &mut Bytes) -> Result<()> {
        Ok(())
    }

    fn perform(&self, sender: PeerId, ctx: &dyn PacketContext) -> Result<()> {
        ctx.hold_alive(sender);
        Ok(())
    }
}

/// A plain UTF-8 string. Logged on arrival.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Text {
    pub text: String,
}

impl Text {
    pub const NAME: &'static str = "peerlink.text";

    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Packet for Text {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_str(&self.text)
    }

    fn read(&mut self, buf: &mut Bytes) -> Result<()> {
        self.text = buf.read_str()?;
        Ok(())
    }

    fn perform(&self, sender: PeerId, _ctx: &dyn PacketContext) -> Result<()> {
        info!(peer = %sender, text = %self.text, "Text packet received");
        Ok(())
    }
}

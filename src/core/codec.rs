//! # Frame Codec
//!
//! Length-prefixed, compressed frames carrying one packet each.
//!
//! ```text
//! [frame_len: i32 LE] [compressed( [type_id: u32 LE] [body] )]
//! ```
//!
//! The encoder refuses packets whose uncompressed payload exceeds
//! `max_packet_size`; the decoder rejects negative or oversized length
//! prefixes before buffering anything and caps decompressed output at the same
//! limit. Every violation is an error that closes the connection.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{TransportConfig, MAX_FRAME_LEN};
use crate::core::packet::Packet;
use crate::error::constants::ERR_NEGATIVE_FRAME_LENGTH;
use crate::error::{ProtocolError, Result};
use crate::protocol::registry::PacketRegistry;
use crate::utils::compression::{self, CompressionKind};

/// Size of the frame length prefix
pub const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone)]
pub struct PacketCodec {
    registry: Arc<PacketRegistry>,
    compression: CompressionKind,
    level: i32,
    max_packet_size: usize,
    last_frame_len: usize,
}

impl PacketCodec {
    pub fn new(registry: Arc<PacketRegistry>, transport: &TransportConfig) -> Self {
        Self {
            registry,
            compression: transport.compression,
            level: transport.compression_level,
            max_packet_size: transport.max_packet_size,
            last_frame_len: 0,
        }
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    /// Wire size (prefix included) of the most recently decoded frame
    pub fn last_frame_len(&self) -> usize {
        self.last_frame_len
    }

    /// Encode `packet` into one complete frame
    pub fn encode_frame(&self, packet: &dyn Packet) -> Result<Bytes> {
        let payload = self.registry.encode(packet)?;
        if payload.len() > self.max_packet_size {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }

        let compressed = compression::compress(&payload, self.compression, self.level)?;
        if compressed.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::OversizedPacket(compressed.len()));
        }

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + compressed.len());
        frame.put_i32_le(compressed.len() as i32);
        frame.put_slice(&compressed);
        Ok(frame.freeze())
    }

    /// Decompress one frame payload (without its prefix) and decode the packet
    pub fn decode_payload(&self, compressed: &[u8]) -> Result<Box<dyn Packet>> {
        let raw = compression::decompress(compressed, self.compression, self.max_packet_size)?;
        self.registry.decode(Bytes::from(raw))
    }
}

impl Decoder for PacketCodec {
    type Item = Box<dyn Packet>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if len < 0 {
            return Err(ProtocolError::InvalidFrame(ERR_NEGATIVE_FRAME_LENGTH));
        }
        let len = len as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::OversizedPacket(len));
        }

        let total = LENGTH_PREFIX + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(len);
        self.last_frame_len = total;
        self.decode_payload(&payload).map(Some)
    }
}

impl<'a> Encoder<&'a dyn Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a dyn Packet, dst: &mut BytesMut) -> Result<()> {
        let frame = self.encode_frame(item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::protocol::builtin::{Heartbeat, Text};

    fn codec() -> PacketCodec {
        PacketCodec::new(Arc::new(PacketRegistry::new()), &TransportConfig::default())
    }

    #[test]
    fn test_frame_layout() {
        let codec = codec();
        let frame = codec.encode_frame(&Heartbeat).unwrap();
        let declared = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, frame.len() - LENGTH_PREFIX);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = codec();
        let frame = codec.encode_frame(&Text::new("abc")).unwrap();

        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), frame.len() - 1);

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        let packet = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(packet.downcast_ref::<Text>().unwrap().text, "abc");
        assert!(buf.is_empty());
        assert_eq!(codec.last_frame_len(), frame.len());
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&(-1i32).to_le_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_length_rejected_before_buffering() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&((MAX_FRAME_LEN + 1) as i32).to_le_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(_))
        ));
    }

    #[test]
    fn test_encoder_trait_matches_encode_frame() {
        let mut codec = codec();
        let packet = Text::new("same");
        let mut dst = BytesMut::new();
        codec.encode(&packet as &dyn Packet, &mut dst).unwrap();
        assert_eq!(dst.freeze(), codec.encode_frame(&packet).unwrap());
    }
}

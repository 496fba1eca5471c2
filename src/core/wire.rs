//! # Packet body helpers
//!
//! Extension traits used by `Packet::write` and `Packet::read` implementations.
//!
//! ## Encoding
//! - Integers and floats: little-endian
//! - `bool`: one byte, `0` or `1`
//! - Strings and blobs: `u32` LE length followed by the bytes
//! - [`PeerId`]: 16 big-endian bytes
//! - Any serde value: a bincode blob
//!
//! Every read is bounds checked. Running off the end of a body is a
//! `DeserializeError`, never a panic.

use bytes::{Buf, BufMut, Bytes};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::peer_id::PeerId;
use crate::error::constants::{ERR_INVALID_UTF8, ERR_TRUNCATED_BODY};
use crate::error::{ProtocolError, Result};

/// Write helpers on top of [`BufMut`]
pub trait WireWrite: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_blob(&mut self, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| ProtocolError::OversizedPacket(value.len()))?;
        self.put_u32_le(len);
        self.put_slice(value);
        Ok(())
    }

    fn put_str(&mut self, value: &str) -> Result<()> {
        self.put_blob(value.as_bytes())
    }

    fn put_peer_id(&mut self, value: PeerId) {
        self.put_slice(&value.to_bytes());
    }

    fn put_serde<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let encoded =
            bincode::serialize(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
        self.put_blob(&encoded)
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}

/// Checked read helpers on top of [`Buf`]
pub trait WireRead: Buf {
    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(ProtocolError::DeserializeError(format!(
                "{ERR_TRUNCATED_BODY}: needed {needed} bytes, {} left",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::DeserializeError(format!(
                "invalid bool byte {other}"
            ))),
        }
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.get_u16_le())
    }

    fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.get_u32_le())
    }

    fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.get_u64_le())
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.get_i32_le())
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.get_i64_le())
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.get_f32_le())
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.get_f64_le())
    }

    fn read_blob(&mut self) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        Ok(self.copy_to_bytes(len))
    }

    fn read_str(&mut self) -> Result<String> {
        let raw = self.read_blob()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| ProtocolError::DeserializeError(format!("{ERR_INVALID_UTF8}: {e}")))
    }

    fn read_peer_id(&mut self) -> Result<PeerId> {
        self.ensure(16)?;
        let mut raw = [0u8; 16];
        self.copy_to_slice(&mut raw);
        Ok(PeerId::from_bytes(raw))
    }

    fn read_serde<T: DeserializeOwned>(&mut self) -> Result<T> {
        let raw = self.read_blob()?;
        bincode::deserialize(&raw).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

impl<B: Buf + ?Sized> WireRead for B {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_mixed_fields_roundtrip() {
        let peer = PeerId::random();
        let mut buf = BytesMut::new();
        buf.put_u32_le(7);
        buf.put_bool(true);
        buf.put_str("héllo").unwrap();
        buf.put_peer_id(peer);
        buf.put_f64_le(1.5);
        buf.put_serde(&vec![1u16, 2, 3]).unwrap();

        let mut bytes = buf.freeze();
        assert_eq!(bytes.read_u32().unwrap(), 7);
        assert!(bytes.read_bool().unwrap());
        assert_eq!(bytes.read_str().unwrap(), "héllo");
        assert_eq!(bytes.read_peer_id().unwrap(), peer);
        assert_eq!(bytes.read_f64().unwrap(), 1.5);
        assert_eq!(bytes.read_serde::<Vec<u16>>().unwrap(), vec![1, 2, 3]);
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn test_integers_are_little_endian() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0x0102_0304);
        assert_eq!(&buf[..], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_truncated_reads_are_errors() {
        let mut short = Bytes::from_static(&[1, 2]);
        assert!(matches!(
            short.read_u32(),
            Err(ProtocolError::DeserializeError(_))
        ));

        // Length prefix promises more than is present
        let mut lying = Bytes::from_static(&[10, 0, 0, 0, b'a']);
        assert!(lying.read_str().is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut buf = BytesMut::new();
        buf.put_blob(&[0xff, 0xfe]).unwrap();
        let mut bytes = buf.freeze();
        assert!(bytes.read_str().is_err());
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut bytes = Bytes::from_static(&[2]);
        assert!(bytes.read_bool().is_err());
    }
}

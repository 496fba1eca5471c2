//! Peer identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// 128-bit random identifier for one connection.
///
/// A server assigns a fresh id to every accepted connection. The remote side
/// tags its single server connection with [`PeerId::NIL`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeerId(u128);

impl PeerId {
    /// The id of a remote's connection to its server
    pub const NIL: PeerId = PeerId(0);

    /// Generate a random, never-nil id
    pub fn random() -> Self {
        loop {
            let value: u128 = rand::random();
            if value != 0 {
                return PeerId(value);
            }
        }
    }

    pub const fn from_u128(value: u128) -> Self {
        PeerId(value)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(ProtocolError::DeserializeError(format!(
                "peer id must be 32 hex digits, got {}",
                s.len()
            )));
        }
        u128::from_str_radix(s, 16)
            .map(PeerId)
            .map_err(|e| ProtocolError::DeserializeError(format!("invalid peer id '{s}': {e}")))
    }
}

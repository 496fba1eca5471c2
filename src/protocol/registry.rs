use crate::core::packet::Packet;
use crate::error::constants::{ERR_REGISTRY_READ_LOCK, ERR_REGISTRY_WRITE_LOCK, ERR_TRUNCATED_TYPE_ID};
use crate::error::{ProtocolError, Result};
use crate::protocol::builtin::{Heartbeat, Text};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::debug;

/// Wire identifier of a registered packet type
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketTypeId(pub u32);

impl fmt::Display for PacketTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Factory = fn() -> Box<dyn Packet>;

fn make<T: Packet + Default + 'static>() -> Box<dyn Packet> {
    Box::new(T::default())
}

struct Entry {
    name: &'static str,
    factory: Factory,
}

#[derive(Default)]
struct Tables {
    by_id: Vec<Entry>,
    by_name: HashMap<&'static str, PacketTypeId>,
}

/// Maps packet types to sequential wire ids and back.
///
/// Ids are handed out in registration order, so both peers must register the
/// same types in the same order. Compare [`fingerprint`](Self::fingerprint)
/// values out of band to check that they did.
pub struct PacketRegistry {
    tables: RwLock<Tables>,
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self
            .tables
            .read()
            .map(|t| t.by_id.iter().map(|e| e.name).collect())
            .unwrap_or_default();
        f.debug_struct("PacketRegistry")
            .field("packets", &names)
            .finish()
    }
}

impl PacketRegistry {
    /// A registry holding the builtin packets: `Heartbeat` (id 0) and `Text` (id 1)
    pub fn new() -> Self {
        let mut tables = Tables::default();
        for (name, factory) in [
            (Heartbeat::NAME, make::<Heartbeat> as Factory),
            (Text::NAME, make::<Text> as Factory),
        ] {
            let id = PacketTypeId(tables.by_id.len() as u32);
            tables.by_name.insert(name, id);
            tables.by_id.push(Entry { name, factory });
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// A registry with nothing registered, not even the heartbeat
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Register `T` under the next free id
    pub fn register<T: Packet + Default + 'static>(&self) -> Result<PacketTypeId> {
        let name = T::default().name();

        let mut tables = self
            .tables
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_WRITE_LOCK.to_string()))?;

        if tables.by_name.contains_key(name) {
            return Err(ProtocolError::DuplicatePacket(name.to_string()));
        }

        let id = PacketTypeId(tables.by_id.len() as u32);
        tables.by_name.insert(name, id);
        tables.by_id.push(Entry {
            name,
            factory: make::<T>,
        });

        debug!(packet = name, id = id.0, "Registered packet type");
        Ok(id)
    }

    /// Id assigned to the concrete type of `packet`
    pub fn id_of(&self, packet: &dyn Packet) -> Result<PacketTypeId> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_READ_LOCK.to_string()))?;

        tables
            .by_name
            .get(packet.name())
            .copied()
            .ok_or_else(|| ProtocolError::UnregisteredPacket(packet.name().to_string()))
    }

    pub fn name_of(&self, id: PacketTypeId) -> Option<&'static str> {
        let tables = self.tables.read().ok()?;
        tables.by_id.get(id.0 as usize).map(|e| e.name)
    }

    /// Fresh default instance of the type registered under `id`
    pub fn create(&self, id: PacketTypeId) -> Result<Box<dyn Packet>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_REGISTRY_READ_LOCK.to_string()))?;

        tables
            .by_id
            .get(id.0 as usize)
            .map(|entry| (entry.factory)())
            .ok_or(ProtocolError::UnknownPacketType(id.0))
    }

    /// Serialise `packet` as `[u32 LE type id][body]`
    pub fn encode(&self, packet: &dyn Packet) -> Result<BytesMut> {
        let id = self.id_of(packet)?;
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32_le(id.0);
        packet.write(&mut buf)?;
        Ok(buf)
    }

    /// Rebuild a packet from `[u32 LE type id][body]`
    pub fn decode(&self, mut payload: Bytes) -> Result<Box<dyn Packet>> {
        if payload.remaining() < 4 {
            return Err(ProtocolError::DeserializeError(
                ERR_TRUNCATED_TYPE_ID.to_string(),
            ));
        }
        let id = PacketTypeId(payload.get_u32_le());
        let mut packet = self.create(id)?;
        packet.read(&mut payload)?;
        Ok(packet)
    }

    /// SHA-256 over the ordered `(id, name)` table
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        if let Ok(tables) = self.tables.read() {
            for (id, entry) in tables.by_id.iter().enumerate() {
                hasher.update((id as u32).to_le_bytes());
                hasher.update((entry.name.len() as u32).to_le_bytes());
                hasher.update(entry.name.as_bytes());
            }
        }
        hasher.finalize().into()
    }

    /// Fingerprint as lowercase hex, for logs
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Shared helpers for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::cell::RefCell;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use peerlink::config::NetworkConfig;
use peerlink::core::wire::{WireRead, WireWrite};
use peerlink::{Packet, PacketContext, PacketRegistry, PeerId, Result};

thread_local! {
    static PERFORMED: RefCell<Vec<(PeerId, Probe)>> = const { RefCell::new(Vec::new()) };
}

/// Packet that records itself on the thread that performs it.
///
/// `tick()` runs on the test thread, so each test sees only its own probes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Probe {
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Probe {
    pub fn new(seq: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }
}

impl Packet for Probe {
    fn name(&self) -> &'static str {
        "test.probe"
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32_le(self.seq);
        buf.put_blob(&self.payload)
    }

    fn read(&mut self, buf: &mut Bytes) -> Result<()> {
        self.seq = buf.read_u32()?;
        self.payload = buf.read_blob()?.to_vec();
        Ok(())
    }

    fn perform(&self, sender: PeerId, _ctx: &dyn PacketContext) -> Result<()> {
        PERFORMED.with(|p| p.borrow_mut().push((sender, self.clone())));
        Ok(())
    }
}

/// Answers with a `Probe` carrying the same sequence number
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ping {
    pub seq: u32,
}

impl Packet for Ping {
    fn name(&self) -> &'static str {
        "test.ping"
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32_le(self.seq);
        Ok(())
    }

    fn read(&mut self, buf: &mut Bytes) -> Result<()> {
        self.seq = buf.read_u32()?;
        Ok(())
    }

    fn perform(&self, sender: PeerId, ctx: &dyn PacketContext) -> Result<()> {
        let reply = Probe::new(self.seq, b"pong".to_vec());
        if sender.is_nil() {
            ctx.send_to_server(&reply)
        } else {
            ctx.send_to_remote(sender, &reply)
        }
    }
}

/// Registry shared by every test peer: builtins, then `Probe`, then `Ping`
pub fn registry() -> Arc<PacketRegistry> {
    let registry = PacketRegistry::new();
    registry.register::<Probe>().unwrap();
    registry.register::<Ping>().unwrap();
    Arc::new(registry)
}

/// Loopback-only config with discovery off and fast compression
pub fn test_config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.bind_address = "127.0.0.1".into();
        c.server.shutdown_timeout = Duration::from_secs(2);
        c.discovery.enabled = false;
        c.transport.compression_level = 3;
    })
}

/// Like [`test_config`] with a sub-second heartbeat/eviction cadence
pub fn fast_liveness_config() -> NetworkConfig {
    let mut config = test_config();
    config.client.heartbeat_interval = Duration::from_millis(100);
    config.server.sweep_interval = Duration::from_millis(100);
    config.server.liveness_timeout = Duration::from_millis(600);
    config
}

/// Probes performed on this thread since the last call
pub fn take_performed() -> Vec<(PeerId, Probe)> {
    PERFORMED.with(|p| std::mem::take(&mut *p.borrow_mut()))
}

/// Run `step` until it returns true or `timeout` passes
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut step: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    step()
}

pub const WAIT: Duration = Duration::from_secs(5);

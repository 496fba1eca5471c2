//! # Socket
//!
//! The application-facing endpoint. A socket can host a **server** (accepting
//! remotes, tracking them by [`PeerId`], evicting silent ones) and act as a
//! **remote** (one connection to a server, kept alive with heartbeats). The
//! two roles are independent and may run at the same time.
//!
//! All I/O runs on a runtime owned by the socket. The public API is
//! synchronous and is meant to be driven from one plain control thread that
//! calls [`Socket::tick`] regularly: `tick` runs the heartbeat and eviction
//! cadence and then performs every packet received since the last call.
//!
//! ```no_run
//! use std::sync::Arc;
//! use peerlink::config::NetworkConfig;
//! use peerlink::protocol::{PacketRegistry, Text};
//! use peerlink::transport::{ConnectTarget, Socket};
//!
//! # fn main() -> peerlink::error::Result<()> {
//! let registry = Arc::new(PacketRegistry::new());
//! let mut server = Socket::new(NetworkConfig::default(), registry.clone())?;
//! let addr = server.start(0)?;
//!
//! let mut remote = Socket::new(NetworkConfig::default(), registry)?;
//! remote.connect(ConnectTarget::from(addr))?;
//! remote.send_to_server(&Text::new("hello"))?;
//!
//! loop {
//!     server.tick();
//!     remote.tick();
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::{Incoming, Packet, PacketContext};
use crate::core::peer_id::PeerId;
use crate::error::constants::ERR_RUNTIME_START;
use crate::error::{ProtocolError, Result};
use crate::protocol::builtin::Heartbeat;
use crate::protocol::registry::PacketRegistry;
use crate::transport::channel::{Channel, ChannelEvents, ChannelSettings, Outbound};
use crate::transport::{discovery, liveness, server};
use crate::utils::metrics::{Metrics, MetricsSnapshot, Timer};
use crate::utils::timeout::{with_timeout, with_timeout_error};

/// Where [`Socket::connect`] should connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// The server hosted in this process: this socket's own server if it runs
    /// one, otherwise `server.port` on the loopback interface
    Integrated,
    /// The first server announcing itself on the LAN
    Lan,
    /// An explicit host and port
    Address { host: String, port: u16 },
}

impl From<SocketAddr> for ConnectTarget {
    fn from(addr: SocketAddr) -> Self {
        ConnectTarget::Address {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Everything the I/O tasks mutate, behind one lock
#[derive(Default)]
pub(crate) struct State {
    pub(crate) channels: HashMap<PeerId, Channel>,
    pub(crate) remote: Option<Channel>,
    pub(crate) inbox: Vec<Incoming>,
    /// Tasks of channels that went away on their own, awaiting a join
    pub(crate) retired: Vec<JoinHandle<()>>,
}

/// State shared between the socket and its I/O tasks
pub(crate) struct Shared {
    state: Mutex<State>,
    settings: ChannelSettings,
    next_serial: AtomicU64,
    max_connections: usize,
}

impl Shared {
    /// Lock the state, recovering from poisoning.
    ///
    /// No fallible work happens under the lock, so a panic elsewhere cannot
    /// leave the maps half-updated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.settings.metrics
    }

    pub(crate) fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Drop a failed or evicted channel at once, discarding unsent frames
    fn retire(&self, state: &mut State, channel: Channel) {
        state.retired.extend(channel.abort());
        self.metrics().connection_closed();
    }
}

impl ChannelEvents for Shared {
    fn deliver(&self, incoming: Incoming) {
        self.lock().inbox.push(incoming);
    }

    fn closed(&self, peer: PeerId, serial: u64) {
        let mut state = self.lock();

        if peer.is_nil() {
            if state.remote.as_ref().is_some_and(|c| c.serial() == serial) {
                if let Some(channel) = state.remote.take() {
                    info!(server = %channel.addr(), "Lost connection to server");
                    self.retire(&mut state, channel);
                }
            }
            return;
        }

        if state.channels.get(&peer).is_some_and(|c| c.serial() == serial) {
            if let Some(channel) = state.channels.remove(&peer) {
                info!(peer = %peer, "Remote disconnected");
                self.retire(&mut state, channel);
            }
        }
    }
}

struct ServerRole {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// A peer-to-peer endpoint hosting a server role, a remote role, or both
pub struct Socket {
    config: NetworkConfig,
    registry: Arc<PacketRegistry>,
    codec: PacketCodec,
    shared: Arc<Shared>,
    server: Option<ServerRole>,
    last_sweep: Instant,
    runtime: Runtime,
}

impl Socket {
    /// Create a socket with its own I/O runtime. No role is active yet.
    pub fn new(config: NetworkConfig, registry: Arc<PacketRegistry>) -> Result<Self> {
        config.validate_strict()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.transport.io_threads)
            .thread_name("peerlink-io")
            .enable_all()
            .build()
            .map_err(|e| ProtocolError::Custom(format!("{ERR_RUNTIME_START}: {e}")))?;

        let codec = PacketCodec::new(registry.clone(), &config.transport);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            settings: ChannelSettings {
                codec: codec.clone(),
                metrics: Arc::new(Metrics::new()),
                send_queue_limit: config.transport.send_queue_limit,
                read_buffer_size: config.transport.read_buffer_size,
            },
            next_serial: AtomicU64::new(1),
            max_connections: config.server.max_connections,
        });

        info!(
            packets = registry.len(),
            fingerprint = %registry.fingerprint_hex(),
            compression = config.transport.compression.name(),
            "Socket created"
        );

        Ok(Self {
            config,
            registry,
            codec,
            shared,
            server: None,
            last_sweep: Instant::now(),
            runtime,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics().snapshot()
    }

    /// Log a metrics snapshot at info level
    pub fn log_metrics(&self) {
        self.shared.metrics().log_metrics();
    }

    // ---------------------------------------------------------------------
    // Remote role
    // ---------------------------------------------------------------------

    /// Connect to a server. Returns the address actually connected to.
    pub fn connect(&mut self, target: ConnectTarget) -> Result<SocketAddr> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }

        let addr = self.resolve(target)?;
        let _timer = Timer::start("connect");
        let timeout = self.config.client.connection_timeout;

        let stream = match self
            .runtime
            .block_on(with_timeout_error(TcpStream::connect(addr), timeout))
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(server = %addr, error = %e, "Failed to connect to server");
                self.shared.metrics().connection_error();
                return Err(e);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(server = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let _guard = self.runtime.enter();
        let mut state = self.shared.lock();
        if state.remote.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        let events: Arc<dyn ChannelEvents> = self.shared.clone();
        let channel = Channel::spawn(
            stream,
            PeerId::NIL,
            self.shared.next_serial(),
            addr,
            events,
            self.shared.settings(),
        );
        state.remote = Some(channel);
        self.shared.metrics().connection_established();

        info!(server = %addr, "Connected to server");
        Ok(addr)
    }

    fn resolve(&self, target: ConnectTarget) -> Result<SocketAddr> {
        match target {
            ConnectTarget::Integrated => {
                let port = self
                    .server
                    .as_ref()
                    .map_or(self.config.server.port, |s| s.local_addr.port());
                Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            }
            ConnectTarget::Lan => self.discover(),
            ConnectTarget::Address { host, port } => {
                let mut addrs = self
                    .runtime
                    .block_on(tokio::net::lookup_host((host.as_str(), port)))?;
                addrs.next().ok_or_else(|| {
                    ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no address found for {host}"),
                    ))
                })
            }
        }
    }

    /// Listen for a LAN server announcement without connecting
    pub fn discover(&self) -> Result<SocketAddr> {
        self.runtime.block_on(discovery::listen(&self.config.discovery))
    }

    /// Queue `packet` for the server this socket is connected to
    pub fn send_to_server(&self, packet: &dyn Packet) -> Result<()> {
        let frame = self.codec.encode_frame(packet)?;
        let outbound = self
            .shared
            .lock()
            .remote
            .as_ref()
            .map(Channel::outbound)
            .ok_or(ProtocolError::NotConnected)?;

        outbound.send(frame)?;
        self.shared.metrics().packet_sent();
        Ok(())
    }

    /// Close the server connection. Does nothing if there is none.
    pub fn disconnect(&mut self) {
        let (channel, retired) = {
            let mut state = self.shared.lock();
            (state.remote.take(), std::mem::take(&mut state.retired))
        };

        let mut tasks = retired;
        if let Some(channel) = channel {
            info!(server = %channel.addr(), "Disconnecting from server");
            tasks.extend(channel.close());
            self.shared.metrics().connection_closed();
        }
        self.join(tasks);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().remote.is_some()
    }

    /// Address of the connected server
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().remote.as_ref().map(Channel::addr)
    }

    // ---------------------------------------------------------------------
    // Server role
    // ---------------------------------------------------------------------

    /// Start accepting remotes on `port` (0 picks a free one).
    ///
    /// Also starts the discovery beacon when enabled. Returns the bound address.
    pub fn start(&mut self, port: u16) -> Result<SocketAddr> {
        if self.server.is_some() {
            return Err(ProtocolError::AlreadyRunning);
        }

        let ip: IpAddr = self.config.server.bind_address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Invalid bind address '{}': {e}",
                self.config.server.bind_address
            ))
        })?;

        let _guard = self.runtime.enter();
        let listener = server::bind_listener(SocketAddr::new(ip, port)).map_err(|e| {
            warn!(port, error = %e, "Failed to start server");
            e
        })?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![self.runtime.spawn(server::accept_loop(
            listener,
            local_addr,
            self.shared.clone(),
            shutdown_rx.clone(),
        ))];
        if self.config.discovery.enabled {
            tasks.push(self.runtime.spawn(discovery::beacon(
                self.config.discovery.clone(),
                local_addr.port(),
                shutdown_rx,
            )));
        }

        self.server = Some(ServerRole {
            local_addr,
            shutdown,
            tasks,
        });
        self.last_sweep = Instant::now();

        info!(addr = %local_addr, beacon = self.config.discovery.enabled, "Server started");
        Ok(local_addr)
    }

    /// Stop accepting and drop every remote. Does nothing if not running.
    pub fn stop(&mut self) {
        let Some(role) = self.server.take() else {
            return;
        };
        let _ = role.shutdown.send(true);

        let mut tasks = role.tasks;
        let peers = {
            let mut state = self.shared.lock();
            let channels: Vec<Channel> = state.channels.drain().map(|(_, c)| c).collect();
            let count = channels.len();
            // Remotes get what was already queued before the stream shuts down
            for channel in channels {
                tasks.extend(channel.close());
                self.shared.metrics().connection_closed();
            }
            tasks.append(&mut state.retired);
            count
        };

        self.join(tasks);
        info!(addr = %role.local_addr, peers, "Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr)
    }

    /// Queue `packet` for one remote. Unknown peers are ignored.
    pub fn send_to_remote(&self, peer: PeerId, packet: &dyn Packet) -> Result<()> {
        let frame = self.codec.encode_frame(packet)?;
        let outbound = self.shared.lock().channels.get(&peer).map(Channel::outbound);

        match outbound {
            Some(outbound) => self.deliver_frame(peer, &outbound, frame),
            None => {
                debug!(peer = %peer, packet = packet.name(), "Dropping packet for unknown peer");
                Ok(())
            }
        }
    }

    /// Queue `packet` for every connected remote
    pub fn send_to_remotes(&self, packet: &dyn Packet) -> Result<()> {
        let frame = self.codec.encode_frame(packet)?;
        let targets: Vec<(PeerId, Outbound)> = self
            .shared
            .lock()
            .channels
            .iter()
            .map(|(peer, c)| (*peer, c.outbound()))
            .collect();
        self.fan_out(targets, frame)
    }

    /// Queue `packet` for each listed remote that is still connected
    pub fn send_to_remotes_in(&self, peers: &[PeerId], packet: &dyn Packet) -> Result<()> {
        let frame = self.codec.encode_frame(packet)?;
        let targets: Vec<(PeerId, Outbound)> = {
            let state = self.shared.lock();
            peers
                .iter()
                .filter_map(|peer| state.channels.get(peer).map(|c| (*peer, c.outbound())))
                .collect()
        };
        self.fan_out(targets, frame)
    }

    fn fan_out(&self, targets: Vec<(PeerId, Outbound)>, frame: bytes::Bytes) -> Result<()> {
        let mut first_error = None;
        for (peer, outbound) in targets {
            if let Err(e) = self.deliver_frame(peer, &outbound, frame.clone()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// A channel already tearing itself down counts as gone, like an unknown peer
    fn deliver_frame(&self, peer: PeerId, outbound: &Outbound, frame: bytes::Bytes) -> Result<()> {
        match outbound.send(frame) {
            Ok(()) => {
                self.shared.metrics().packet_sent();
                Ok(())
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!(peer = %peer, "Dropping packet for closing channel");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Connected remotes, in no particular order
    pub fn peers(&self) -> Vec<PeerId> {
        self.shared.lock().channels.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.lock().channels.len()
    }

    /// Refresh the liveness clock of a remote. Unknown peers are ignored.
    pub fn hold_alive(&self, peer: PeerId) {
        if let Some(channel) = self.shared.lock().channels.get_mut(&peer) {
            channel.touch(Instant::now());
        }
    }

    // ---------------------------------------------------------------------
    // Control loop
    // ---------------------------------------------------------------------

    /// Run one control step. Returns the number of packets performed.
    ///
    /// 1. Sends a heartbeat to the server when one is due.
    /// 2. Evicts remotes silent for longer than the liveness timeout.
    /// 3. Performs every packet received since the previous call, in arrival
    ///    order per channel, outside the socket lock.
    pub fn tick(&mut self) -> usize {
        let now = Instant::now();
        self.heartbeat(now);
        let sweep_interval = self.config.server.sweep_interval;
        if self.server.is_some() && liveness::due(self.last_sweep, now, sweep_interval) {
            self.last_sweep = now;
            self.sweep(now);
        }

        let inbox = {
            let mut state = self.shared.lock();
            state.retired.retain(|task| !task.is_finished());
            std::mem::take(&mut state.inbox)
        };

        let performed = inbox.len();
        for Incoming { sender, packet } in inbox {
            if let Err(e) = packet.perform(sender, &*self) {
                warn!(peer = %sender, packet = packet.name(), error = %e, "Packet perform failed");
            }
        }
        performed
    }

    fn heartbeat(&self, now: Instant) {
        let interval = self.config.client.heartbeat_interval;
        let outbound = {
            let mut state = self.shared.lock();
            match state.remote.as_mut() {
                Some(remote) if liveness::due(remote.last_heartbeat(), now, interval) => {
                    remote.touch(now);
                    Some(remote.outbound())
                }
                _ => None,
            }
        };

        let Some(outbound) = outbound else {
            return;
        };
        let sent = self
            .codec
            .encode_frame(&Heartbeat)
            .and_then(|frame| outbound.send(frame));
        match sent {
            Ok(()) => self.shared.metrics().heartbeat_sent(),
            Err(e) => debug!(error = %e, "Heartbeat not sent"),
        }
    }

    fn sweep(&self, now: Instant) {
        let timeout = self.config.server.liveness_timeout;
        let mut state = self.shared.lock();

        let expired: Vec<PeerId> = state
            .channels
            .iter()
            .filter(|(_, c)| liveness::expired(c.last_heartbeat(), now, timeout))
            .map(|(peer, _)| *peer)
            .collect();

        for peer in expired {
            if let Some(channel) = state.channels.remove(&peer) {
                info!(
                    peer = %peer,
                    silent_ms = now.saturating_duration_since(channel.last_heartbeat()).as_millis() as u64,
                    "Evicting silent remote"
                );
                self.shared.metrics().eviction();
                self.shared.retire(&mut state, channel);
            }
        }
    }

    fn join(&self, tasks: Vec<JoinHandle<()>>) {
        if tasks.is_empty() {
            return;
        }
        let timeout = self.config.server.shutdown_timeout;
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();

        if self
            .runtime
            .block_on(with_timeout(join_all(tasks), timeout))
            .is_err()
        {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "I/O tasks did not finish in time, aborting"
            );
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

impl PacketContext for Socket {
    fn hold_alive(&self, peer: PeerId) {
        Socket::hold_alive(self, peer);
    }

    fn send_to_server(&self, packet: &dyn Packet) -> Result<()> {
        Socket::send_to_server(self, packet)
    }

    fn send_to_remote(&self, peer: PeerId, packet: &dyn Packet) -> Result<()> {
        Socket::send_to_remote(self, peer, packet)
    }

    fn send_to_remotes(&self, packet: &dyn Packet) -> Result<()> {
        Socket::send_to_remotes(self, packet)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.stop();
        self.disconnect();
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr())
            .field("server_addr", &self.server_addr())
            .field("peers", &self.peer_count())
            .finish()
    }
}

//! One live peer connection.
//!
//! A [`Channel`] owns two tasks: a reader that turns frames into packets and
//! hands them to [`ChannelEvents::deliver`], and a writer that drains the
//! outbound queue one `write_all` at a time, so frames leave in enqueue
//! order. Either task reports a dead connection through
//! [`ChannelEvents::closed`], keyed by the channel's serial so a stale report
//! never removes a newer connection for the same peer.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, instrument, warn};

use crate::core::codec::PacketCodec;
use crate::core::packet::Incoming;
use crate::core::peer_id::PeerId;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Metrics;

/// Callbacks from a channel's I/O tasks into its owner
pub trait ChannelEvents: Send + Sync + 'static {
    /// A packet arrived on the channel
    fn deliver(&self, incoming: Incoming);

    /// The channel `(peer, serial)` failed and should be removed
    fn closed(&self, peer: PeerId, serial: u64);
}

/// Everything a channel's tasks need besides the stream
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub codec: PacketCodec,
    pub metrics: Arc<Metrics>,
    /// 0 means unbounded
    pub send_queue_limit: usize,
    pub read_buffer_size: usize,
}

/// Sending half of a channel's outbound queue
#[derive(Debug, Clone)]
pub enum Outbound {
    Unbounded(mpsc::UnboundedSender<Bytes>),
    Bounded(mpsc::Sender<Bytes>),
}

impl Outbound {
    /// Queue one encoded frame.
    ///
    /// A full bounded queue blocks a plain thread until the writer catches up.
    /// Inside a runtime it fails with `Backpressure` instead, since blocking
    /// there would stall the reactor that drains the queue.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        match self {
            Outbound::Unbounded(tx) => tx.send(frame).map_err(|_| ProtocolError::ConnectionClosed),
            Outbound::Bounded(tx) => {
                if Handle::try_current().is_ok() {
                    tx.try_send(frame).map_err(|e| match e {
                        TrySendError::Full(_) => ProtocolError::Backpressure,
                        TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
                    })
                } else {
                    tx.blocking_send(frame)
                        .map_err(|_| ProtocolError::ConnectionClosed)
                }
            }
        }
    }
}

enum Queue {
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
    Bounded(mpsc::Receiver<Bytes>),
}

impl Queue {
    async fn recv(&mut self) -> Option<Bytes> {
        match self {
            Queue::Unbounded(rx) => rx.recv().await,
            Queue::Bounded(rx) => rx.recv().await,
        }
    }
}

fn queue(limit: usize) -> (Outbound, Queue) {
    if limit == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbound::Unbounded(tx), Queue::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(limit);
        (Outbound::Bounded(tx), Queue::Bounded(rx))
    }
}

pub struct Channel {
    peer: PeerId,
    serial: u64,
    addr: SocketAddr,
    outbound: Outbound,
    shutdown: oneshot::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    last_heartbeat: Instant,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &format_args!("{}", self.peer))
            .field("serial", &self.serial)
            .field("addr", &self.addr)
            .finish()
    }
}

impl Channel {
    /// Split `stream` and start its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        stream: TcpStream,
        peer: PeerId,
        serial: u64,
        addr: SocketAddr,
        events: Arc<dyn ChannelEvents>,
        settings: &ChannelSettings,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = queue(settings.send_queue_limit);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let reader = tokio::spawn(read_loop(
            read_half,
            peer,
            serial,
            events.clone(),
            settings.clone(),
            shutdown_rx,
        ));
        let writer = tokio::spawn(write_loop(
            write_half,
            queue,
            peer,
            serial,
            events,
            settings.metrics.clone(),
        ));

        Self {
            peer,
            serial,
            addr,
            outbound,
            shutdown: shutdown_tx,
            tasks: vec![reader, writer],
            last_heartbeat: Instant::now(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// Stop the channel and hand back its tasks for joining.
    ///
    /// The reader stops at once. The writer flushes frames already queued and
    /// then shuts the stream down, unless other `Outbound` clones are alive.
    pub fn close(self) -> Vec<JoinHandle<()>> {
        let Channel { shutdown, tasks, .. } = self;
        let _ = shutdown.send(());
        tasks
    }

    /// Tear the channel down without flushing.
    ///
    /// Both tasks are aborted, which drops both stream halves and closes the
    /// socket even while the writer is stuck on a peer that stopped reading.
    /// Frames still queued are discarded.
    pub fn abort(self) -> Vec<JoinHandle<()>> {
        let Channel { shutdown, tasks, .. } = self;
        let _ = shutdown.send(());
        for task in &tasks {
            task.abort();
        }
        tasks
    }
}

#[instrument(name = "channel_reader", skip_all, fields(peer = %peer))]
async fn read_loop(
    read_half: OwnedReadHalf,
    peer: PeerId,
    serial: u64,
    events: Arc<dyn ChannelEvents>,
    settings: ChannelSettings,
    mut shutdown: oneshot::Receiver<()>,
) {
    let metrics = settings.metrics;
    let mut frames = FramedRead::with_capacity(read_half, settings.codec, settings.read_buffer_size);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!("Reader stopped");
                return;
            }

            next = frames.next() => match next {
                Some(Ok(packet)) => {
                    metrics.packet_received(frames.decoder().last_frame_len() as u64);
                    events.deliver(Incoming { sender: peer, packet });
                }
                Some(Err(e)) if e.is_protocol_violation() => {
                    error!(error = %e, "Protocol violation, closing channel");
                    metrics.protocol_error();
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Channel read failed");
                    metrics.connection_error();
                    break;
                }
                None => {
                    info!("Peer closed the connection");
                    break;
                }
            }
        }
    }

    events.closed(peer, serial);
}

#[instrument(name = "channel_writer", skip_all, fields(peer = %peer))]
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut queue: Queue,
    peer: PeerId,
    serial: u64,
    events: Arc<dyn ChannelEvents>,
    metrics: Arc<Metrics>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            warn!(error = %e, "Channel write failed");
            metrics.connection_error();
            // Release blocked senders before reporting
            drop(queue);
            events.closed(peer, serial);
            return;
        }
        metrics.bytes_written(frame.len() as u64);
    }

    if let Err(e) = write_half.shutdown().await {
        debug!(error = %e, "Stream shutdown failed");
    }
    debug!("Writer stopped");
}

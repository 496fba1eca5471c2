//! Server role: listener setup and the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::core::peer_id::PeerId;
use crate::error::Result;
use crate::transport::channel::{Channel, ChannelEvents};
use crate::transport::socket::Shared;

const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion) does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Bind `addr` with `SO_REUSEADDR` so a restarted server can reclaim its port
pub(crate) fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

#[instrument(name = "accept_loop", skip_all, fields(addr = %local_addr))]
pub(crate) async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Accept loop stopping");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => admit(&shared, stream, addr),
                Err(e) => {
                    warn!(error = %e, "Error accepting connection");
                    shared.metrics().connection_error();
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Register an accepted stream as a new channel.
///
/// The channel is spawned while the socket lock is held, so a connection that
/// fails instantly cannot report its closure before it is in the map.
fn admit(shared: &Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let mut state = shared.lock();
    if state.channels.len() >= shared.max_connections() {
        warn!(
            addr = %addr,
            limit = shared.max_connections(),
            "Connection limit reached, refusing remote"
        );
        return;
    }

    let peer = PeerId::random();
    let serial = shared.next_serial();
    let events: Arc<dyn ChannelEvents> = shared.clone();
    let channel = Channel::spawn(stream, peer, serial, addr, events, shared.settings());
    state.channels.insert(peer, channel);
    shared.metrics().connection_established();

    info!(peer = %peer, addr = %addr, "Remote connected");
}

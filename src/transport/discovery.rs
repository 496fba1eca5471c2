//! # LAN Discovery
//!
//! A running server broadcasts `"<service> server <port>"` over UDP at a fixed
//! interval. A remote looking for a server listens on the discovery port and
//! takes the first announcement for its service, pairing the advertised TCP
//! port with the datagram's source address.
//!
//! Announcements are plain ASCII so they can be inspected with any packet
//! capture tool.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::DiscoveryConfig;
use crate::error::{ProtocolError, Result};

const MAX_DATAGRAM: usize = 512;

/// Text a server broadcasts for `service` listening on `port`
pub fn announcement(service: &str, port: u16) -> String {
    format!("{service} server {port}")
}

/// Advertised port if `text` is an announcement for `service`
pub fn parse_announcement(text: &str, service: &str) -> Option<u16> {
    let port = text.strip_prefix(service)?.strip_prefix(" server ")?;
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

fn broadcast_target(config: &DiscoveryConfig) -> Result<SocketAddr> {
    let ip: Ipv4Addr = config.broadcast_address.parse().map_err(|e| {
        ProtocolError::ConfigError(format!(
            "Invalid broadcast address '{}': {e}",
            config.broadcast_address
        ))
    })?;
    Ok(SocketAddr::from((ip, config.port)))
}

/// Announce `advertised_port` until `shutdown` fires or its sender is dropped
#[instrument(name = "discovery_beacon", skip_all, fields(port = advertised_port))]
pub(crate) async fn beacon(
    config: DiscoveryConfig,
    advertised_port: u16,
    mut shutdown: watch::Receiver<bool>,
) {
    let target = match broadcast_target(&config) {
        Ok(target) => target,
        Err(e) => {
            error!(error = %e, "Discovery beacon disabled");
            return;
        }
    };

    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            error!(error = %e, "Failed to bind discovery beacon socket");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!(error = %e, "Failed to enable broadcast on beacon socket");
    }

    let message = announcement(&config.service_name, advertised_port);
    let mut ticker = tokio::time::interval(config.interval);
    info!(destination = %target, "Discovery beacon started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match socket.send_to(message.as_bytes(), target).await {
                    Ok(_) => trace!("Beacon sent"),
                    Err(e) => warn!(error = %e, "Failed to send discovery beacon"),
                }
            }
        }
    }

    debug!("Discovery beacon stopped");
}

/// Wait for a server announcement, up to `config.timeout`
#[instrument(name = "discovery_listen", skip_all, fields(port = config.port, service = %config.service_name))]
pub async fn listen(config: &DiscoveryConfig) -> Result<SocketAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
    let deadline = Instant::now() + config.timeout;
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (len, from) = match received {
            Err(_) => {
                warn!("No server announced itself before the deadline");
                return Err(ProtocolError::DiscoveryTimeout);
            }
            Ok(result) => result?,
        };

        let port = std::str::from_utf8(&buf[..len])
            .ok()
            .and_then(|text| parse_announcement(text, &config.service_name));

        match port {
            Some(port) => {
                let server = SocketAddr::new(from.ip(), port);
                info!(server = %server, "Discovered server");
                return Ok(server);
            }
            None => debug!(from = %from, "Ignoring unrelated datagram"),
        }
    }
}

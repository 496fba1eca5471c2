//! Timeout defaults and async timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for connect attempts
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a remote proves it is alive
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// How often the server sweeps for dead channels
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Silence after which a server-side channel is evicted
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for joining background tasks on stop/disconnect
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a LAN discovery attempt listens before giving up
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a future with a timeout, mapping expiry to [`ProtocolError::Timeout`]
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Run a fallible future with a timeout, flattening both error sources
pub async fn with_timeout_error<F, T, E>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<ProtocolError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ProtocolError::Timeout),
    }
}

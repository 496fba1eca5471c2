//! # Utility Modules
//!
//! Supporting utilities for compression, logging, metrics and timing.
//!
//! ## Components
//! - **Compression**: zstd and LZ4 with an output size cap
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-socket atomic counters
//! - **Timeout**: Default intervals and async timeout wrappers

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use compression::CompressionKind;
pub use metrics::{Metrics, MetricsSnapshot};

//! # lib_telemetry
//!
//! A resilient real-time telemetry client. It keeps a long-lived subscription
//! to a streaming upstream alive across network failures, smooths noisy
//! per-entity metric streams into stable values and raises reactive and
//! predictive threshold alerts.
//!
//! The crate is organised the same way data flows through it:
//!
//! - [`connection`]: transport seam, lifecycle manager, sink.
//! - [`core`]: backoff, cache, windows, trends, alerts, self-monitoring.
//! - [`configs`]: serde-backed configuration with defaults.
//! - [`transports`]: concrete transports behind feature flags
//!   (`wss` for WebSocket).

pub mod configs;
pub mod connection;
pub mod core;
pub mod error;
pub mod transports;

// Re-export the everyday surface
pub use configs::ClientConfig;
pub use connection::{
    ChannelSink, ClientHandle, ClientStatus, ConnectionState, NullSink, SinkEvent, TelemetryClient,
    TelemetrySink, Transport, TransportEvent,
};
pub use crate::core::{Alert, AlertType, CacheMetrics, PerformanceMetrics, PerformanceReport, Snapshot};
pub use error::{ClientError, ErrorKind, Result, TransportError};

#[cfg(feature = "wss")]
pub use transports::WssTransport;

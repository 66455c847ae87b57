//! # Connection Module
//!
//! Everything that touches the live connection: the transport seam, the
//! lifecycle manager that drives it, and the sink through which results leave
//! the client.
//!
//! ## Components:
//!
//! - **`manager`**: The single-owner event loop (`TelemetryClient`) and its
//!   cloneable front end (`ClientHandle`).
//! - **`transport`**: The trait a socket implementation provides.
//! - **`events`**: Transport events and validation of inbound payloads.
//! - **`queue`**: Offline operation log replayed on reconnect.
//! - **`ack`**: Timeout-bounded acknowledgment waits.
//! - **`state`**: Connection states, reconnect budget and rate-limit cooldown.
//! - **`sink`**: The consumer-facing callback trait.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod ack;
pub mod events;
/// The connection lifecycle manager.
pub mod manager;
pub mod queue;
pub mod sink;
pub mod state;
pub mod transport;

pub use events::{InboundEvent, TransportEvent};
pub use manager::{ClientHandle, ClientStatus, TelemetryClient};
pub use sink::{ChannelSink, NullSink, SinkEvent, TelemetrySink};
pub use state::ConnectionState;
pub use transport::Transport;

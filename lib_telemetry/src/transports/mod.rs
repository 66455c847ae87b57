//! # Transports
//!
//! Concrete [`Transport`](crate::connection::Transport) implementations, each
//! behind its own feature flag.

#[cfg(feature = "wss")]
/// JSON frames over a WebSocket.
pub mod wss;

#[cfg(feature = "wss")]
pub use wss::WssTransport;

//! The transport seam.
//!
//! A transport owns the socket and nothing else. It never reconnects on its
//! own: the manager drives every retry. Inbound traffic and lifecycle changes
//! are pushed onto the [`TransportEvent`](super::events::TransportEvent)
//! channel handed out when the transport is built.

use std::future::Future;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::TransportError;

pub trait Transport: Send + 'static {
    /// Opens a fresh connection. Resolves once the upstream accepted it.
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection without reporting a `Disconnected` event.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Sends one event. When `ack` is given, the upstream's reply is delivered
    /// through it; dropping it unanswered means the reply will never come.
    fn emit(
        &mut self,
        event: &str,
        payload: Value,
        ack: Option<oneshot::Sender<Value>>,
    ) -> Result<(), TransportError>;

    /// Replaces the credentials used by the next `connect`.
    fn refresh_credentials(&mut self, _token: String) {}
}

//! Bounded waits for acknowledgments.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

use crate::error::{ClientError, Result};

/// Waits for the transport to deliver the reply for `event`.
///
/// Exactly one timer is armed per call and it is dropped on either outcome.
pub async fn await_ack(
    reply: oneshot::Receiver<Value>,
    limit: Duration,
    event: &str,
) -> Result<Value> {
    await_ack_until(reply, Instant::now() + limit, limit, event).await
}

/// Like [`await_ack`] against a deadline fixed earlier, e.g. when the call
/// was queued. `limit` is only reported in the timeout error.
pub async fn await_ack_until(
    reply: oneshot::Receiver<Value>,
    deadline: Instant,
    limit: Duration,
    event: &str,
) -> Result<Value> {
    match timeout_at(deadline, reply).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(ClientError::AckDropped {
            event: event.to_string(),
        }),
        Err(_) => Err(ClientError::AckTimeout {
            event: event.to_string(),
            timeout: limit,
        }),
    }
}

/// Like [`await_ack_until`], also reporting the round trip.
pub async fn timed_ack(
    reply: oneshot::Receiver<Value>,
    deadline: Instant,
    limit: Duration,
    event: &str,
) -> (Result<Value>, Duration) {
    let started = Instant::now();
    let result = await_ack_until(reply, deadline, limit, event).await;
    (result, started.elapsed())
}

/// Reads `{status}` out of a subscribe acknowledgment.
pub fn subscribe_succeeded(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some("success")
}

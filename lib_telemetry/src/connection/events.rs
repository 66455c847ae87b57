//! Transport events and boundary validation of inbound payloads.
//!
//! Raw `(event, payload)` pairs coming off the wire are turned into an
//! [`InboundEvent`] before anything else sees them. A payload that lacks the
//! entity id field, or an update that is not a JSON object, becomes a
//! `MalformedPayload` error which the manager logs and drops.

use serde_json::Value;

use crate::configs::ClientConfig;
use crate::core::cache::Snapshot;
use crate::error::{ClientError, TransportError};

/// Everything a transport reports back to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The live connection went away. Sent at most once per connection.
    Disconnected { reason: String },
    /// Out-of-band error reported by the upstream.
    Error(TransportError),
    /// An application event.
    Message { event: String, payload: Value },
}

/// A validated application event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `<entity>_update`
    Update { entity_id: String, payload: Snapshot },
    /// `<entity>_state_change`
    StateChange { entity_id: String, payload: Value },
    /// `<entity>_alert`
    Alert { entity_id: String, payload: Value },
    /// Anything else; ignored.
    Unknown { event: String },
}

impl InboundEvent {
    /// Validates `payload` for `event` against the configured entity kind.
    pub fn parse(event: &str, payload: Value, config: &ClientConfig) -> Result<Self, ClientError> {
        if event == config.update_event() {
            let entity_id = entity_id(event, &payload, config)?;
            match payload {
                Value::Object(map) => Ok(InboundEvent::Update {
                    entity_id,
                    payload: map,
                }),
                _ => Err(malformed(event, "update payload is not an object")),
            }
        } else if event == config.state_change_event() {
            Ok(InboundEvent::StateChange {
                entity_id: entity_id(event, &payload, config)?,
                payload,
            })
        } else if event == config.alert_event() {
            Ok(InboundEvent::Alert {
                entity_id: entity_id(event, &payload, config)?,
                payload,
            })
        } else {
            Ok(InboundEvent::Unknown {
                event: event.to_string(),
            })
        }
    }
}

/// The entity id may arrive as a string or a number.
fn entity_id(event: &str, payload: &Value, config: &ClientConfig) -> Result<String, ClientError> {
    let field = config.id_field();
    match payload.get(&field) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(_) => Err(malformed(event, &format!("'{}' is not a valid id", field))),
        None => Err(malformed(event, &format!("missing '{}'", field))),
    }
}

fn malformed(event: &str, reason: &str) -> ClientError {
    ClientError::MalformedPayload {
        event: event.to_string(),
        reason: reason.to_string(),
    }
}

/// Non-empty `warnings` array carried by an update, if any.
pub fn warnings(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .get("warnings")
        .and_then(Value::as_array)
        .filter(|list| !list.is_empty())
}

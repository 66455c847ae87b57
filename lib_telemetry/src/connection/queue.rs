//! Outbound operations requested while offline.
//!
//! Nothing in the queue is retried after replay: on reconnect every entry
//! younger than the retention window is attempted once, in FIFO order, and the
//! queue is cleared regardless of the outcome.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

/// What a queued entry will do when replayed.
#[derive(Debug)]
pub enum OperationKind {
    /// Acknowledged subscribe for one entity.
    Subscribe { entity_id: String },
    /// Fire-and-forget event.
    Emit { event: String },
    /// Acknowledged event. The caller's wait is bounded by `deadline`, set when
    /// the call was made; once it passes `responder` is taken and the event
    /// replays without anyone waiting on the reply.
    EmitWithAck {
        event: String,
        timeout: Duration,
        deadline: Instant,
        responder: Option<oneshot::Sender<Result<Value>>>,
    },
}

#[derive(Debug)]
pub struct QueuedOperation {
    pub kind: OperationKind,
    pub payload: Value,
    pub enqueued_at: Instant,
}

impl QueuedOperation {
    pub fn new(kind: OperationKind, payload: Value, enqueued_at: Instant) -> Self {
        Self {
            kind,
            payload,
            enqueued_at,
        }
    }

    /// Wire event name, or the entity id for subscribes.
    pub fn label(&self) -> &str {
        match &self.kind {
            OperationKind::Subscribe { entity_id } => entity_id,
            OperationKind::Emit { event } | OperationKind::EmitWithAck { event, .. } => event,
        }
    }

    pub fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.enqueued_at) >= retention
    }
}

/// Result of draining the queue on reconnect.
#[derive(Debug, Default)]
pub struct Replay {
    /// Still within retention, oldest first.
    pub valid: Vec<QueuedOperation>,
    pub expired: Vec<QueuedOperation>,
}

#[derive(Debug, Default)]
pub struct OperationQueue {
    entries: VecDeque<QueuedOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: QueuedOperation) {
        self.entries.push_back(operation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the queue, splitting entries by age at `now`.
    pub fn drain(&mut self, now: Instant, retention: Duration) -> Replay {
        let (expired, valid) = self
            .entries
            .drain(..)
            .partition(|op| op.is_expired(now, retention));
        Replay { valid, expired }
    }

    /// Earliest deadline among queued calls whose caller is still waiting.
    pub fn next_ack_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter_map(|op| match &op.kind {
                OperationKind::EmitWithAck {
                    deadline,
                    responder: Some(_),
                    ..
                } => Some(*deadline),
                _ => None,
            })
            .min()
    }

    /// Fails every waiting caller whose deadline is at or before `now`. The
    /// entries stay queued. Returns the errors handed out.
    pub fn expire_acks(&mut self, now: Instant) -> Vec<ClientError> {
        let mut expired = Vec::new();
        for op in self.entries.iter_mut() {
            if let OperationKind::EmitWithAck {
                event,
                timeout,
                deadline,
                responder,
            } = &mut op.kind
            {
                if *deadline > now {
                    continue;
                }
                if let Some(responder) = responder.take() {
                    let error = ClientError::AckTimeout {
                        event: event.clone(),
                        timeout: *timeout,
                    };
                    let _ = responder.send(Err(error.clone()));
                    expired.push(error);
                }
            }
        }
        expired
    }

    /// Drops everything, releasing any waiting responders.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

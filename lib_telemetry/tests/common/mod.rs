//! Shared fixtures for the integration tests: a scripted in-memory transport
//! and helpers for draining a `ChannelSink`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_telemetry::{
    ChannelSink, ClientConfig, ClientHandle, SinkEvent, TelemetryClient, Transport, TransportError,
    TransportEvent,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How the mock answers acknowledged emits.
#[derive(Debug, Clone)]
pub enum AckMode {
    /// Reply immediately with this value.
    Reply(Value),
    /// Keep the reply channel until the test releases it.
    Hold,
}

#[derive(Debug)]
struct Inner {
    connect_script: VecDeque<Result<(), TransportError>>,
    connect_calls: u32,
    connected: bool,
    emitted: Vec<(String, Value)>,
    ack_mode: AckMode,
    held: Vec<(String, Value, oneshot::Sender<Value>)>,
    tokens: Vec<String>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockControl {
    inner: Arc<Mutex<Inner>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

pub fn mock_transport() -> (MockTransport, MockControl, mpsc::UnboundedReceiver<TransportEvent>) {
    let inner = Arc::new(Mutex::new(Inner {
        connect_script: VecDeque::new(),
        connect_calls: 0,
        connected: false,
        emitted: Vec::new(),
        ack_mode: AckMode::Reply(json!({ "status": "success" })),
        held: Vec::new(),
        tokens: Vec::new(),
    }));
    let (events, rx) = mpsc::unbounded_channel();
    (
        MockTransport {
            inner: inner.clone(),
        },
        MockControl { inner, events },
        rx,
    )
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_calls += 1;
        let result = inner.connect_script.pop_front().unwrap_or(Ok(()));
        inner.connected = result.is_ok();
        result
    }

    async fn disconnect(&mut self) {
        self.inner.lock().unwrap().connected = false;
    }

    fn emit(
        &mut self,
        event: &str,
        payload: Value,
        ack: Option<oneshot::Sender<Value>>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::Closed);
        }
        inner.emitted.push((event.to_string(), payload.clone()));
        if let Some(ack) = ack {
            match inner.ack_mode.clone() {
                AckMode::Reply(value) => {
                    let _ = ack.send(value);
                }
                AckMode::Hold => inner.held.push((event.to_string(), payload, ack)),
            }
        }
        Ok(())
    }

    fn refresh_credentials(&mut self, token: String) {
        self.inner.lock().unwrap().tokens.push(token);
    }
}

impl MockControl {
    /// Queues results for upcoming `connect` calls; unscripted calls succeed.
    pub fn script_connects(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.inner.lock().unwrap().connect_script.extend(results);
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        self.inner.lock().unwrap().ack_mode = mode;
    }

    pub fn connect_calls(&self) -> u32 {
        self.inner.lock().unwrap().connect_calls
    }

    pub fn tokens(&self) -> Vec<String> {
        self.inner.lock().unwrap().tokens.clone()
    }

    /// Everything emitted so far, excluding the periodic performance metrics.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.inner
            .lock()
            .unwrap()
            .emitted
            .iter()
            .filter(|(event, _)| event != "performance_metrics")
            .cloned()
            .collect()
    }

    pub fn emitted_named(&self, name: &str) -> Vec<Value> {
        self.emitted()
            .into_iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn held_acks(&self) -> usize {
        self.inner.lock().unwrap().held.len()
    }

    /// Answers every held ack whose request matches. Returns how many.
    pub fn release_held<F>(&self, matches: F, reply: Value) -> usize
    where
        F: Fn(&str, &Value) -> bool,
    {
        let mut inner = self.inner.lock().unwrap();
        let (release, keep): (Vec<_>, Vec<_>) = inner
            .held
            .drain(..)
            .partition(|(event, payload, _)| matches(event, payload));
        inner.held = keep;
        let released = release.len();
        for (_, _, ack) in release {
            let _ = ack.send(reply.clone());
        }
        released
    }

    pub fn clear_emitted(&self) {
        self.inner.lock().unwrap().emitted.clear();
    }

    /// Simulates the upstream dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        self.inner.lock().unwrap().connected = false;
        self.events
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .unwrap();
    }

    pub fn push_message(&self, event: &str, payload: Value) {
        self.events
            .send(TransportEvent::Message {
                event: event.to_string(),
                payload,
            })
            .unwrap();
    }

    pub fn push_error(&self, error: TransportError) {
        self.events.send(TransportEvent::Error(error)).unwrap();
    }
}

pub struct Harness {
    pub handle: ClientHandle,
    pub control: MockControl,
    pub sink: mpsc::UnboundedReceiver<SinkEvent>,
    pub task: JoinHandle<()>,
}

/// Spawns a client over a fresh mock transport.
pub fn start(config: ClientConfig) -> Harness {
    let (transport, control, events) = mock_transport();
    let (sink, sink_rx) = ChannelSink::new();
    let (client, handle) = TelemetryClient::new(config, transport, events, sink).unwrap();
    let task = tokio::spawn(client.run());
    Harness {
        handle,
        control,
        sink: sink_rx,
        task,
    }
}

/// Receives sink events until one matches, failing after `limit` of
/// (virtual) time.
pub async fn wait_for<F>(
    sink: &mut mpsc::UnboundedReceiver<SinkEvent>,
    limit: Duration,
    mut matches: F,
) -> SinkEvent
where
    F: FnMut(&SinkEvent) -> bool,
{
    tokio::time::timeout(limit, async {
        loop {
            let event = sink.recv().await.expect("sink channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected sink event did not arrive")
}

pub fn update(entity_id: &str, bitrate: f64, latency: f64) -> Value {
    json!({
        "encoder_id": entity_id,
        "streaming": { "bitrate": bitrate },
        "network": { "latency": latency, "packet_loss": 0.0 }
    })
}

/// Discards whatever the sink has reported so far.
pub fn drain(sink: &mut mpsc::UnboundedReceiver<SinkEvent>) {
    while sink.try_recv().is_ok() {}
}

/// Fails the test instead of letting paused time run forever.
pub async fn within<F: std::future::Future>(limit: Duration, fut: F) -> F::Output {
    tokio::time::timeout(limit, fut)
        .await
        .expect("operation did not finish in time")
}

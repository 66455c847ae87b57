//! # Connection Lifecycle Manager
//!
//! [`TelemetryClient`] owns the transport and every piece of mutable client
//! state. It runs as one task that multiplexes:
//!
//! - commands from any number of [`ClientHandle`]s,
//! - transport events (messages, disconnects, upstream errors),
//! - completions of in-flight acknowledged requests,
//! - the reconnect backoff deadline and the rate-limit cooldown,
//! - deadlines of acknowledged emits still waiting in the offline queue,
//! - the aggregation, trend and reporting ticks.
//!
//! Each wake-up is handled to completion before the next one is looked at, so
//! the cache, buffers, counters and queue need no locks.
//!
//! ## Lifecycle
//! `disconnected -> connecting -> connected`. A lost connection, or a network
//! error while connected, schedules an immediate reconnect; each failed attempt
//! bumps the attempt counter and sleeps per the backoff policy until
//! `max_attempts` is reached, at which point the client parks in `error` and
//! callers waiting on `connect` get [`ClientError::ReconnectExhausted`]. Rejected credentials park the client in
//! `auth_failed` until [`ClientHandle::reconnect`] is called. Rate limiting
//! defers reconnects without spending attempts.
//!
//! On every successful connect the offline queue is replayed once and then
//! cleared, and every subscribed entity not already re-issued by the replay is
//! resubscribed with its own acknowledgment.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::configs::ClientConfig;
use crate::connection::ack::{subscribe_succeeded, timed_ack};
use crate::connection::events::{warnings, InboundEvent, TransportEvent};
use crate::connection::queue::{OperationKind, OperationQueue, QueuedOperation};
use crate::connection::sink::TelemetrySink;
use crate::connection::state::{ConnectionState, RateLimitCooldown, ReconnectPolicy, RetryDecision};
use crate::connection::transport::Transport;
use crate::core::alerts::Thresholds;
use crate::core::cache::{CacheMetrics, Snapshot, TelemetryCache};
use crate::core::performance::{PerformanceMonitor, PerformanceReport};
use crate::core::trend;
use crate::core::window::{self, extract_sample, SampleBuffers};
use crate::error::{ClientError, Result, TransportError};

const PERFORMANCE_METRICS_EVENT: &str = "performance_metrics";
const PERFORMANCE_REPORT_EVENT: &str = "performance_report";

enum Command {
    Connect {
        responder: oneshot::Sender<Result<()>>,
    },
    Reconnect {
        token: Option<String>,
        responder: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        entity_id: String,
        responder: oneshot::Sender<Result<bool>>,
    },
    Emit {
        event: String,
        payload: Value,
        responder: oneshot::Sender<Result<()>>,
    },
    EmitWithAck {
        event: String,
        payload: Value,
        timeout: Option<Duration>,
        responder: oneshot::Sender<Result<Value>>,
    },
    Snapshot {
        entity_id: String,
        responder: oneshot::Sender<Option<Snapshot>>,
    },
    CacheMetrics {
        responder: oneshot::Sender<CacheMetrics>,
    },
    ConnectionState {
        responder: oneshot::Sender<ConnectionState>,
    },
    Status {
        responder: oneshot::Sender<ClientStatus>,
    },
    PerformanceReport {
        responder: oneshot::Sender<PerformanceReport>,
    },
}

/// Point-in-time view of the manager's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub queued_operations: usize,
    pub pending_acks: usize,
    pub subscriptions: Vec<String>,
}

enum AckPurpose {
    Subscribe {
        entity_id: String,
        responder: Option<oneshot::Sender<Result<bool>>>,
    },
    Reply {
        responder: oneshot::Sender<Result<Value>>,
    },
}

struct AckOutcome {
    purpose: AckPurpose,
    result: Result<Value>,
    elapsed: Duration,
}

type PendingAck = BoxFuture<'static, AckOutcome>;

/// Cloneable front end to a running [`TelemetryClient`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl ClientHandle {
    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| ClientError::ShutDown)?;
        rx.await.map_err(|_| ClientError::ShutDown)
    }

    /// Connects, retrying with backoff. Resolves once connected, or with the
    /// terminal error (`ReconnectExhausted`, `AuthFailed`).
    pub async fn connect(&self) -> Result<()> {
        self.request(|responder| Command::Connect { responder }).await?
    }

    /// Re-enters the lifecycle after `auth_failed` or `error`, optionally with
    /// fresh credentials. The attempt budget starts over.
    pub async fn reconnect(&self, token: Option<String>) -> Result<()> {
        self.request(|responder| Command::Reconnect { token, responder })
            .await?
    }

    /// Acknowledged subscribe. `Ok(false)` when the upstream declined or when
    /// the request was queued because the client is offline.
    pub async fn subscribe(&self, entity_id: impl Into<String>) -> Result<bool> {
        let entity_id = entity_id.into();
        self.request(|responder| Command::Subscribe {
            entity_id,
            responder,
        })
        .await?
    }

    /// Fire-and-forget event; queued while offline.
    pub async fn emit(&self, event: impl Into<String>, payload: Value) -> Result<()> {
        let event = event.into();
        self.request(|responder| Command::Emit {
            event,
            payload,
            responder,
        })
        .await?
    }

    /// Event awaiting a reply; `None` uses the configured ack timeout.
    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let event = event.into();
        self.request(|responder| Command::EmitWithAck {
            event,
            payload,
            timeout,
            responder,
        })
        .await?
    }

    /// Cached snapshot for an entity (counts as a cache lookup).
    pub async fn snapshot(&self, entity_id: impl Into<String>) -> Result<Option<Snapshot>> {
        let entity_id = entity_id.into();
        self.request(|responder| Command::Snapshot {
            entity_id,
            responder,
        })
        .await
    }

    pub async fn cache_metrics(&self) -> Result<CacheMetrics> {
        self.request(|responder| Command::CacheMetrics { responder }).await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState> {
        self.request(|responder| Command::ConnectionState { responder })
            .await
    }

    pub async fn status(&self) -> Result<ClientStatus> {
        self.request(|responder| Command::Status { responder }).await
    }

    /// Builds a performance report and sends it upstream (queued while offline).
    pub async fn performance_report(&self) -> Result<PerformanceReport> {
        self.request(|responder| Command::PerformanceReport { responder })
            .await
    }

    /// Stops the client. Teardown happens on the manager task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

pub struct TelemetryClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    sink: Box<dyn TelemetrySink>,
    shutdown: CancellationToken,

    state: ConnectionState,
    reconnect: ReconnectPolicy,
    cooldown: RateLimitCooldown,
    reconnect_at: Option<Instant>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    queue: OperationQueue,
    subscriptions: BTreeSet<String>,
    pending: FuturesUnordered<PendingAck>,

    cache: TelemetryCache,
    buffers: SampleBuffers,
    thresholds: Thresholds,
    monitor: PerformanceMonitor,
}

impl<T: Transport> TelemetryClient<T> {
    /// Validates `config` and wires the manager to its transport and sink.
    pub fn new<S>(
        config: ClientConfig,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        sink: S,
    ) -> Result<(Self, ClientHandle)>
    where
        S: TelemetrySink + 'static,
    {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let thresholds = Thresholds::new(config.thresholds.clone());

        let client = Self {
            transport,
            events,
            commands: command_rx,
            sink: Box::new(sink),
            shutdown: shutdown.clone(),
            state: ConnectionState::Disconnected,
            reconnect: ReconnectPolicy::from_config(&config),
            cooldown: RateLimitCooldown::from_config(&config),
            reconnect_at: None,
            connect_waiters: Vec::new(),
            queue: OperationQueue::new(),
            subscriptions: BTreeSet::new(),
            pending: FuturesUnordered::new(),
            cache: TelemetryCache::from_config(&config.cache),
            buffers: SampleBuffers::new(Duration::from_millis(config.window.window_ms)),
            monitor: PerformanceMonitor::new(thresholds.clone(), config.history_limit),
            thresholds,
            config,
        };
        let handle = ClientHandle {
            commands: command_tx,
            shutdown,
        };
        Ok((client, handle))
    }

    /// Runs until [`ClientHandle::shutdown`] is called, then tears down.
    pub async fn run(mut self) {
        let start = Instant::now();
        let mut aggregation = ticker(start, self.config.window.aggregation_interval_ms);
        let mut trends = ticker(start, self.config.trend.interval_ms);
        let mut reporting = ticker(start, self.config.report_interval_ms);
        self.monitor.start_tracking(start);

        log::info!(
            "Telemetry client started for '{}' entities",
            self.config.entity_kind
        );

        loop {
            let reconnect_at = self.reconnect_at;
            let cooldown_until = self.cooldown.until();
            let ack_deadline = self.queue.next_ack_deadline();

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log::info!("Telemetry client shutting down...");
                    break;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                }
                Some(event) = self.events.recv() => {
                    self.handle_transport_event(event).await;
                }
                Some(outcome) = self.pending.next(), if !self.pending.is_empty() => {
                    self.handle_ack(outcome);
                }
                _ = sleep_until(reconnect_at.unwrap_or(start)), if reconnect_at.is_some() => {
                    self.attempt_connect().await;
                }
                _ = sleep_until(cooldown_until.unwrap_or(start)), if cooldown_until.is_some() => {
                    self.release_cooldown();
                }
                _ = sleep_until(ack_deadline.unwrap_or(start)), if ack_deadline.is_some() => {
                    self.expire_queued_acks();
                }
                _ = aggregation.tick() => {
                    self.aggregate();
                }
                _ = trends.tick() => {
                    self.analyze_trends();
                }
                _ = reporting.tick() => {
                    self.report_performance();
                }
            }
        }

        self.teardown().await;
    }

    // --- Commands ---

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { responder } => self.request_connect(responder),
            Command::Reconnect { token, responder } => {
                if let Some(token) = token {
                    log::info!("Credentials refreshed");
                    self.transport.refresh_credentials(token);
                }
                self.reconnect.reset();
                if matches!(self.state, ConnectionState::AuthFailed | ConnectionState::Error) {
                    self.set_state(ConnectionState::Disconnected);
                }
                self.request_connect(responder);
            }
            Command::Subscribe {
                entity_id,
                responder,
            } => self.subscribe(entity_id, responder),
            Command::Emit {
                event,
                payload,
                responder,
            } => {
                let _ = responder.send(self.emit(event, payload));
            }
            Command::EmitWithAck {
                event,
                payload,
                timeout,
                responder,
            } => {
                let limit = timeout.unwrap_or_else(|| self.config.ack_timeout());
                let deadline = Instant::now() + limit;
                if self.state == ConnectionState::Connected {
                    self.send_with_ack(event, payload, deadline, limit, responder);
                } else {
                    self.enqueue(
                        OperationKind::EmitWithAck {
                            event,
                            timeout: limit,
                            deadline,
                            responder: Some(responder),
                        },
                        payload,
                    );
                }
            }
            Command::Snapshot {
                entity_id,
                responder,
            } => {
                let _ = responder.send(self.cache.get(&entity_id));
            }
            Command::CacheMetrics { responder } => {
                let _ = responder.send(self.cache.metrics());
            }
            Command::ConnectionState { responder } => {
                let _ = responder.send(self.visible_state());
            }
            Command::Status { responder } => {
                let _ = responder.send(self.status());
            }
            Command::PerformanceReport { responder } => {
                let report = self.monitor.report();
                match serde_json::to_value(&report) {
                    Ok(payload) => {
                        if let Err(e) = self.emit(PERFORMANCE_REPORT_EVENT.to_string(), payload) {
                            log::warn!("Failed to send performance report: {}", e);
                        }
                    }
                    Err(e) => log::error!("Failed to serialize performance report: {}", e),
                }
                let _ = responder.send(report);
            }
        }
    }

    fn request_connect(&mut self, responder: oneshot::Sender<Result<()>>) {
        match self.state {
            ConnectionState::Connected => {
                let _ = responder.send(Ok(()));
            }
            ConnectionState::AuthFailed => {
                let _ = responder.send(Err(ClientError::AuthFailed));
            }
            _ => {
                self.connect_waiters.push(responder);
                if self.reconnect_at.is_none() {
                    self.schedule_reconnect(Instant::now());
                }
            }
        }
    }

    fn subscribe(&mut self, entity_id: String, responder: oneshot::Sender<Result<bool>>) {
        if self.state != ConnectionState::Connected {
            log::info!("Offline; queueing subscribe for {}", entity_id);
            let payload = self.subscribe_payload(&entity_id);
            self.enqueue(OperationKind::Subscribe { entity_id }, payload);
            let _ = responder.send(Ok(false));
            return;
        }
        self.send_subscribe(entity_id, Some(responder));
    }

    fn emit(&mut self, event: String, payload: Value) -> Result<()> {
        if self.state != ConnectionState::Connected {
            self.enqueue(OperationKind::Emit { event }, payload);
            return Ok(());
        }
        self.transport
            .emit(&event, payload, None)
            .map_err(ClientError::from)
    }

    fn enqueue(&mut self, kind: OperationKind, payload: Value) {
        let operation = QueuedOperation::new(kind, payload, Instant::now());
        log::debug!("Queued '{}' while {}", operation.label(), self.state);
        self.queue.push(operation);
    }

    // --- Outbound with acknowledgment ---

    fn subscribe_payload(&self, entity_id: &str) -> Value {
        let mut payload = Map::new();
        payload.insert(self.config.id_field(), Value::String(entity_id.to_string()));
        Value::Object(payload)
    }

    fn send_subscribe(&mut self, entity_id: String, responder: Option<oneshot::Sender<Result<bool>>>) {
        let event = self.config.subscribe_event();
        let payload = self.subscribe_payload(&entity_id);
        let (tx, rx) = oneshot::channel();

        if let Err(e) = self.transport.emit(&event, payload, Some(tx)) {
            let error = ClientError::from(e);
            log::warn!("Subscribe for {} not sent: {}", entity_id, error);
            self.sink.on_subscription_result(&entity_id, false);
            self.sink.on_error(&error);
            if let Some(responder) = responder {
                let _ = responder.send(Err(error));
            }
            return;
        }

        let limit = self.config.ack_timeout();
        let deadline = Instant::now() + limit;
        self.pending.push(
            async move {
                let (result, elapsed) = timed_ack(rx, deadline, limit, &event).await;
                AckOutcome {
                    purpose: AckPurpose::Subscribe {
                        entity_id,
                        responder,
                    },
                    result,
                    elapsed,
                }
            }
            .boxed(),
        );
    }

    fn send_with_ack(
        &mut self,
        event: String,
        payload: Value,
        deadline: Instant,
        limit: Duration,
        responder: oneshot::Sender<Result<Value>>,
    ) {
        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.transport.emit(&event, payload, Some(tx)) {
            let _ = responder.send(Err(e.into()));
            return;
        }
        self.pending.push(
            async move {
                let (result, elapsed) = timed_ack(rx, deadline, limit, &event).await;
                AckOutcome {
                    purpose: AckPurpose::Reply { responder },
                    result,
                    elapsed,
                }
            }
            .boxed(),
        );
    }

    fn handle_ack(&mut self, outcome: AckOutcome) {
        if outcome.result.is_ok() {
            if let Some(alert) = self.monitor.record_latency(outcome.elapsed) {
                self.sink.on_alert(&alert);
            }
        }

        match outcome.purpose {
            AckPurpose::Subscribe {
                entity_id,
                responder,
            } => {
                let result = outcome.result.map(|response| subscribe_succeeded(&response));
                match &result {
                    Ok(true) => {
                        log::info!("Subscribed to {}", entity_id);
                        self.subscriptions.insert(entity_id.clone());
                        self.sink.on_subscription_result(&entity_id, true);
                    }
                    Ok(false) => {
                        log::warn!("Subscription to {} was declined", entity_id);
                        self.sink.on_subscription_result(&entity_id, false);
                    }
                    Err(e) => {
                        log::warn!("Subscription to {} failed: {}", entity_id, e);
                        self.sink.on_subscription_result(&entity_id, false);
                        self.sink.on_error(e);
                    }
                }
                if let Some(responder) = responder {
                    let _ = responder.send(result);
                }
            }
            AckPurpose::Reply { responder } => {
                if let Err(e) = &outcome.result {
                    log::warn!("{}", e);
                    self.sink.on_error(e);
                }
                let _ = responder.send(outcome.result);
            }
        }
    }

    // --- Connection lifecycle ---

    async fn attempt_connect(&mut self) {
        self.reconnect_at = None;
        if self.state == ConnectionState::Connected {
            return;
        }

        self.set_state(ConnectionState::Connecting);
        log::info!(
            "Connecting (attempt {} of {})",
            self.reconnect.attempt_count() + 1,
            self.reconnect.max_attempts()
        );

        let limit = self.config.connect_timeout();
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = timeout(limit, self.transport.connect()) => result,
        };

        match result {
            Ok(Ok(())) => self.on_connected(),
            Ok(Err(e)) => self.on_connect_error(e),
            Err(_) => self.on_connect_error(TransportError::Network(format!(
                "connect timed out after {:?}",
                limit
            ))),
        }
    }

    fn on_connected(&mut self) {
        let now = Instant::now();
        log::info!("Connected");
        self.reconnect.reset();
        self.set_state(ConnectionState::Connected);
        self.monitor.start_tracking(now);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        let reissued = self.replay_queue(now);
        self.resubscribe(&reissued);
    }

    /// Attempts every queued operation once, oldest first. Returns the
    /// entities whose subscribe was among them.
    fn replay_queue(&mut self, now: Instant) -> HashSet<String> {
        let retention = self.config.queue_retention();
        let replay = self.queue.drain(now, retention);

        if !replay.expired.is_empty() {
            log::warn!(
                "Discarding {} queued operation(s) older than {:?}",
                replay.expired.len(),
                retention
            );
        }
        for operation in replay.expired {
            if let OperationKind::EmitWithAck {
                event,
                responder: Some(responder),
                ..
            } = operation.kind
            {
                let _ = responder.send(Err(ClientError::QueueExpired { event }));
            }
        }

        if !replay.valid.is_empty() {
            log::info!("Replaying {} queued operation(s)", replay.valid.len());
        }
        let mut reissued = HashSet::new();
        for operation in replay.valid {
            match operation.kind {
                OperationKind::Subscribe { entity_id } => {
                    reissued.insert(entity_id.clone());
                    self.send_subscribe(entity_id, None);
                }
                OperationKind::Emit { event } => {
                    if let Err(e) = self.transport.emit(&event, operation.payload, None) {
                        log::warn!("Replay of '{}' failed: {}", event, e);
                    }
                }
                OperationKind::EmitWithAck {
                    event,
                    timeout,
                    deadline,
                    responder: Some(responder),
                } if deadline > now => {
                    self.send_with_ack(event, operation.payload, deadline, timeout, responder)
                }
                OperationKind::EmitWithAck {
                    event,
                    timeout,
                    responder,
                    ..
                } => {
                    // Deadline already passed: the event still goes out once.
                    if let Some(responder) = responder {
                        let _ = responder.send(Err(ClientError::AckTimeout {
                            event: event.clone(),
                            timeout,
                        }));
                    }
                    if let Err(e) = self.transport.emit(&event, operation.payload, None) {
                        log::warn!("Replay of '{}' failed: {}", event, e);
                    }
                }
            }
        }
        reissued
    }

    fn expire_queued_acks(&mut self) {
        for error in self.queue.expire_acks(Instant::now()) {
            log::warn!("{}", error);
            self.sink.on_error(&error);
        }
    }

    fn resubscribe(&mut self, skip: &HashSet<String>) {
        let targets: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|id| !skip.contains(*id))
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }
        log::info!("Resubscribing {} entities", targets.len());
        for entity_id in targets {
            self.send_subscribe(entity_id, None);
        }
    }

    fn on_connect_error(&mut self, error: TransportError) {
        match error {
            TransportError::Auth(message) => {
                log::error!("Authentication rejected: {}", message);
                self.halt_for_auth();
            }
            TransportError::RateLimited(message) => {
                log::warn!("Connect refused by rate limit: {}", message);
                self.set_state(ConnectionState::Disconnected);
                self.engage_cooldown();
                self.schedule_reconnect(Instant::now());
            }
            other => {
                log::warn!("Connect attempt failed: {}", other);
                match self.reconnect.record_failure() {
                    RetryDecision::RetryAfter(delay) => {
                        self.set_state(ConnectionState::Disconnected);
                        log::info!("Retrying in {:?}", delay);
                        self.schedule_reconnect(Instant::now() + delay);
                    }
                    RetryDecision::GiveUp { attempts } => {
                        log::error!("Giving up after {} consecutive failures", attempts);
                        self.set_state(ConnectionState::Error);
                        let error = ClientError::ReconnectExhausted { attempts };
                        self.sink.on_error(&error);
                        for waiter in self.connect_waiters.drain(..) {
                            let _ = waiter.send(Err(error.clone()));
                        }
                    }
                }
            }
        }
    }

    fn halt_for_auth(&mut self) {
        self.reconnect_at = None;
        self.set_state(ConnectionState::AuthFailed);
        let error = ClientError::AuthFailed;
        self.sink.on_error(&error);
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn schedule_reconnect(&mut self, at: Instant) {
        self.reconnect_at = Some(self.cooldown.defer(at));
    }

    fn engage_cooldown(&mut self) {
        let before = self.visible_state();
        let delay = self.cooldown.engage(Instant::now());
        log::warn!(
            "Rate limited; holding off for {:?} (level {})",
            delay,
            self.cooldown.level()
        );
        if let Some(at) = self.reconnect_at {
            self.reconnect_at = Some(self.cooldown.defer(at));
        }
        self.notify_if_changed(before);
    }

    fn release_cooldown(&mut self) {
        let before = self.visible_state();
        if self.cooldown.release(Instant::now()) {
            log::info!("Rate-limit cooldown released");
            self.notify_if_changed(before);
        }
    }

    fn notify_if_changed(&mut self, before: ConnectionState) {
        let now = self.visible_state();
        if now != before {
            self.sink.on_connection_state_change(now);
        }
    }

    fn visible_state(&self) -> ConnectionState {
        if self.cooldown.is_active() && self.state != ConnectionState::Connected {
            ConnectionState::RateLimited
        } else {
            self.state
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        log::debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        self.sink.on_connection_state_change(self.visible_state());
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.visible_state(),
            attempt_count: self.reconnect.attempt_count(),
            queued_operations: self.queue.len(),
            pending_acks: self.pending.len(),
            subscriptions: self.subscriptions.iter().cloned().collect(),
        }
    }

    // --- Inbound ---

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Disconnected { reason } => {
                if self.state != ConnectionState::Connected {
                    log::debug!("Ignoring disconnect ({}) while {}", reason, self.state);
                    return;
                }
                log::warn!("Connection lost: {}", reason);
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect(Instant::now());
            }
            TransportEvent::Error(TransportError::Auth(message)) => {
                log::error!("Upstream rejected credentials: {}", message);
                self.transport.disconnect().await;
                self.halt_for_auth();
            }
            TransportEvent::Error(TransportError::RateLimited(message)) => {
                log::warn!("Upstream rate limit: {}", message);
                self.engage_cooldown();
            }
            TransportEvent::Error(error @ (TransportError::Network(_) | TransportError::Closed)) => {
                self.sink.on_error(&ClientError::Transport(error.clone()));
                if self.state != ConnectionState::Connected {
                    log::debug!("Ignoring transport error ({}) while {}", error, self.state);
                    return;
                }
                log::warn!("Connection lost: {}", error);
                self.transport.disconnect().await;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect(Instant::now());
            }
            TransportEvent::Error(other) => {
                log::warn!("Transport error: {}", other);
                self.sink.on_error(&ClientError::Transport(other));
            }
            TransportEvent::Message { event, payload } => self.dispatch(&event, payload),
        }
    }

    fn dispatch(&mut self, event: &str, payload: Value) {
        let started = Instant::now();
        self.monitor.record_message();

        let inbound = match InboundEvent::parse(event, payload, &self.config) {
            Ok(inbound) => inbound,
            Err(e) => {
                log::warn!("Dropping inbound event: {}", e);
                return;
            }
        };

        match inbound {
            InboundEvent::Update { entity_id, payload } => {
                self.apply_update(&entity_id, payload, started);
                if let Some(alert) = self.monitor.record_processing_time(started.elapsed()) {
                    self.sink.on_alert(&alert);
                }
            }
            InboundEvent::StateChange { entity_id, payload } => {
                self.sink.on_entity_state_change(&entity_id, &payload);
            }
            InboundEvent::Alert { entity_id, payload } => {
                self.sink.on_entity_alert(&entity_id, &payload);
            }
            InboundEvent::Unknown { event } => {
                log::debug!("Ignoring unhandled event '{}'", event);
            }
        }
    }

    fn apply_update(&mut self, entity_id: &str, payload: Snapshot, now: Instant) {
        let document = Value::Object(payload);
        let sample = extract_sample(&document, &self.config.tracked);

        if let Some(list) = warnings(&document) {
            self.sink.on_warnings(entity_id, list);
        }
        if let Value::Object(snapshot) = document {
            self.cache.update_at(entity_id, snapshot, now);
        }

        if sample.is_empty() {
            return;
        }
        for alert in self.thresholds.check_sample(entity_id, &sample) {
            self.sink.on_alert(&alert);
        }
        self.buffers.append(entity_id, now, sample);
    }

    // --- Ticks ---

    fn aggregate(&mut self) {
        for record in window::aggregate(&mut self.buffers, Instant::now()) {
            self.sink
                .on_smoothed_metrics(&record.entity_id, &record.smoothed_metrics);
        }
    }

    fn analyze_trends(&mut self) {
        self.buffers.prune(Instant::now());
        let min_samples = self.config.trend.min_samples;
        let horizon = self.config.trend.horizon;

        let mut alerts = Vec::new();
        for (entity_id, buffer) in self.buffers.non_empty() {
            for metric in &self.config.tracked {
                if self.thresholds.get(&metric.name).is_none() {
                    continue;
                }
                if let Some(line) = trend::analyze(buffer, &metric.name, min_samples) {
                    log::trace!(
                        "{} {} trend: slope {:.3}, intercept {:.3}",
                        entity_id,
                        metric.name,
                        line.slope,
                        line.intercept
                    );
                    alerts.extend(self.thresholds.predict(entity_id, &metric.name, &line, horizon));
                }
            }
        }
        for alert in alerts {
            self.sink.on_alert(&alert);
        }
    }

    fn report_performance(&mut self) {
        let (metrics, alert) = self.monitor.tick(Instant::now());
        self.sink.on_performance_metrics(&metrics);
        if let Some(alert) = alert {
            self.sink.on_alert(&alert);
        }
        if self.state != ConnectionState::Connected {
            return;
        }
        match serde_json::to_value(metrics) {
            Ok(payload) => {
                if let Err(e) = self.transport.emit(PERFORMANCE_METRICS_EVENT, payload, None) {
                    log::debug!("Performance metrics not sent: {}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize performance metrics: {}", e),
        }
    }

    // --- Teardown ---

    async fn teardown(&mut self) {
        self.reconnect_at = None;
        self.cache.clear();
        self.buffers.clear();
        self.queue.clear();
        self.subscriptions.clear();
        self.monitor.clear();
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::ShutDown));
        }

        self.transport.disconnect().await;
        self.set_state(ConnectionState::Disconnected);

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            log::debug!(
                "Leaving {} in-flight acknowledgment(s) to time out",
                pending.len()
            );
            tokio::spawn(settle_detached(pending));
        }
        log::info!("Telemetry client stopped");
    }
}

/// Lets acknowledgments outstanding at teardown run to their own timeouts and
/// hands each result to whoever is still waiting.
async fn settle_detached(mut pending: FuturesUnordered<PendingAck>) {
    while let Some(outcome) = pending.next().await {
        match outcome.purpose {
            AckPurpose::Subscribe {
                responder: Some(responder),
                ..
            } => {
                let _ = responder.send(outcome.result.map(|response| subscribe_succeeded(&response)));
            }
            AckPurpose::Subscribe { responder: None, .. } => {}
            AckPurpose::Reply { responder } => {
                let _ = responder.send(outcome.result);
            }
        }
    }
}

fn ticker(start: Instant, period_ms: u64) -> Interval {
    let period = Duration::from_millis(period_ms);
    let mut interval = interval_at(start + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

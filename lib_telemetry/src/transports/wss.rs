//! # WebSocket Transport
//!
//! JSON text frames over tokio-tungstenite.
//!
//! Outbound frames are `{"event": name, "data": payload}` with an extra `"id"`
//! when a reply is wanted. Inbound frames are either `{"event", "data"}` or an
//! acknowledgment `{"ack": id, "data": reply}`. An inbound `error` event is
//! classified into a [`TransportError`] and reported out of band.
//!
//! Each connection runs a writer task draining an outbound channel and a
//! reader task parsing frames. Whichever notices the connection die first
//! reports the single `Disconnected` event; `disconnect()` stops both tasks
//! without reporting anything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        handshake::client::Request,
        http::header::{HeaderValue, AUTHORIZATION},
        protocol::Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connection::events::TransportEvent;
use crate::connection::transport::Transport;
use crate::error::{TransportError, AUTH_FAILED_MESSAGE, RATE_LIMIT_MESSAGE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Shared by the two tasks of one connection.
#[derive(Clone)]
struct Link {
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Link {
    /// Reports the loss once and stops the sibling task.
    fn lost(&self, reason: impl Into<String>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let reason = reason.into();
            log::warn!("WebSocket connection lost: {}", reason);
            let _ = self.events.send(TransportEvent::Disconnected { reason });
        }
        self.cancel.cancel();
    }
}

struct Session {
    outbound: mpsc::UnboundedSender<WsMessage>,
    link: Link,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

pub struct WssTransport {
    url: Url,
    token: Option<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    session: Option<Session>,
    pending: PendingAcks,
    next_id: u64,
}

impl WssTransport {
    /// Validates `url` and returns the transport with its event stream.
    pub fn new(
        url: &str,
        token: Option<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::Protocol(format!("invalid url '{}': {}", url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::Protocol(format!(
                "unsupported scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }

        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            url,
            token,
            events,
            session: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: 1,
        };
        Ok((transport, rx))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request(&self) -> Result<Request, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Protocol(format!("failed to build request: {}", e)))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Protocol(format!("invalid auth token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

impl Transport for WssTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;

        let request = self.request()?;
        log::info!("Connecting to {}", self.url);
        let (stream, _) = connect_async(request).await.map_err(classify_handshake)?;
        log::info!("Connected to {}", self.url);

        let (write, read) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = Link {
            events: self.events.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };

        let writer = tokio::spawn(write_loop(write, outbound_rx, link.clone()));
        let reader = tokio::spawn(read_loop(read, self.pending.clone(), link.clone()));

        self.session = Some(Session {
            outbound: outbound_tx,
            link,
            writer,
            reader,
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.link.closed.store(true, Ordering::SeqCst);
            session.link.cancel.cancel();
            let _ = session.writer.await;
            let _ = session.reader.await;
            log::debug!("Disconnected from {}", self.url);
        }
    }

    fn emit(
        &mut self,
        event: &str,
        payload: Value,
        ack: Option<oneshot::Sender<Value>>,
    ) -> Result<(), TransportError> {
        let session = self
            .session
            .as_ref()
            .filter(|session| !session.link.closed.load(Ordering::SeqCst))
            .ok_or(TransportError::Closed)?;

        let mut frame = json!({ "event": event, "data": payload });
        if let Some(ack) = ack {
            let id = self.next_id;
            self.next_id += 1;
            frame["id"] = json!(id);
            if let Ok(mut pending) = self.pending.lock() {
                // Callers that already timed out no longer need their slot.
                pending.retain(|_, waiting| !waiting.is_closed());
                pending.insert(id, ack);
            }
        }

        log::trace!("Sending frame: {}", frame);
        session
            .outbound
            .send(WsMessage::Text(frame.to_string().into()))
            .map_err(|_| TransportError::Closed)
    }

    fn refresh_credentials(&mut self, token: String) {
        self.token = Some(token);
    }
}

fn classify_handshake(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => TransportError::Auth(AUTH_FAILED_MESSAGE.to_string()),
            429 => TransportError::RateLimited(RATE_LIMIT_MESSAGE.to_string()),
            code => TransportError::Network(format!("handshake rejected with HTTP {}", code)),
        },
        other => TransportError::Network(other.to_string()),
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    link: Link,
) {
    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => {
                let _ = write.close().await;
                break;
            }
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        link.lost(format!("write failed: {}", e));
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, pending: PendingAcks, link: Link) {
    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => break,
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => handle_frame(text.as_str(), &pending, &link.events),
                Some(Ok(WsMessage::Close(close))) => {
                    let reason = close
                        .map(|frame| frame.reason.as_str().to_owned())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by remote host".to_string());
                    link.lost(reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    link.lost(format!("read error: {}", e));
                    break;
                }
                None => {
                    link.lost("stream closed by remote host");
                    break;
                }
            }
        }
    }
}

fn handle_frame(text: &str, pending: &PendingAcks, events: &mpsc::UnboundedSender<TransportEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Ignoring non-JSON frame: {}", e);
            return;
        }
    };
    let data = frame.get("data").cloned().unwrap_or(Value::Null);

    if let Some(id) = frame.get("ack").and_then(Value::as_u64) {
        let waiting = pending.lock().ok().and_then(|mut pending| pending.remove(&id));
        match waiting {
            Some(tx) => {
                let _ = tx.send(data);
            }
            None => log::debug!("Ack {} arrived after its caller gave up", id),
        }
        return;
    }

    let Some(event) = frame.get("event").and_then(Value::as_str) else {
        log::warn!("Ignoring frame without an event name");
        return;
    };

    let message = if event == "error" {
        TransportEvent::Error(TransportError::classify(error_text(&data)))
    } else {
        TransportEvent::Message {
            event: event.to_string(),
            payload: data,
        }
    };
    let _ = events.send(message);
}

/// Upstream errors arrive either as a bare string or as `{message}`.
fn error_text(data: &Value) -> String {
    data.as_str()
        .or_else(|| data.get("message").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

//! WebSocket transport against an in-process server.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lib_telemetry::{Transport, TransportError, TransportEvent, WssTransport};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{self, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no transport event")
        .expect("event channel closed")
}

/// Accepts one client, acks its first request, pushes an update and an
/// upstream error, then closes. Reports the Authorization header it saw.
async fn scripted_server() -> (SocketAddr, oneshot::Receiver<Option<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (auth_tx, auth_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let auth = request
                .headers()
                .get(http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let _ = auth_tx.send(auth);
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        // 1. Answer the acknowledged request
        let request = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("client went away: {:?}", other),
            }
        };
        assert_eq!(request["event"], "subscribe_encoder");
        let ack = json!({ "ack": request["id"], "data": { "status": "success" } });
        ws.send(Message::Text(ack.to_string().into())).await.unwrap();

        // 2. Push an update and an upstream error
        let update = json!({ "event": "encoder_update", "data": { "encoder_id": "enc-1" } });
        ws.send(Message::Text(update.to_string().into())).await.unwrap();
        let error = json!({ "event": "error", "data": { "message": "Rate limit exceeded" } });
        ws.send(Message::Text(error.to_string().into())).await.unwrap();

        // 3. Close and let the handshake finish
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    (addr, auth_rx)
}

/// Rejects every upgrade with `status`.
async fn rejecting_server(status: StatusCode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let callback = move |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                Err(http::Response::builder().status(status).body(None).unwrap())
            };
            let _ = tokio_tungstenite::accept_hdr_async(stream, callback).await;
        }
    });

    addr
}

#[tokio::test]
async fn round_trip_with_ack_push_and_close() {
    let (addr, auth_rx) = scripted_server().await;
    let (mut transport, mut events) =
        WssTransport::new(&format!("ws://{}/socket", addr), Some("secret".into())).unwrap();

    transport.connect().await.unwrap();
    assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer secret"));

    let (ack_tx, ack_rx) = oneshot::channel();
    transport
        .emit("subscribe_encoder", json!({ "encoder_id": "enc-1" }), Some(ack_tx))
        .unwrap();
    let reply = timeout(WAIT, ack_rx).await.unwrap().unwrap();
    assert_eq!(reply, json!({ "status": "success" }));

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Message {
            event: "encoder_update".into(),
            payload: json!({ "encoder_id": "enc-1" }),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Error(TransportError::RateLimited("Rate limit exceeded".into()))
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Disconnected {
            reason: "maintenance".into()
        }
    );

    // Reported once, and the dead session refuses writes.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(
        transport.emit("ping", json!({}), None),
        Err(TransportError::Closed)
    );
}

#[tokio::test]
async fn local_disconnect_is_silent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (mut transport, mut events) = WssTransport::new(&format!("ws://{}", addr), None).unwrap();
    transport.connect().await.unwrap();
    transport.disconnect().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(
        transport.emit("ping", json!({}), None),
        Err(TransportError::Closed)
    );
}

#[tokio::test]
async fn handshake_rejections_are_classified() {
    let addr = rejecting_server(StatusCode::UNAUTHORIZED).await;
    let (mut transport, _events) = WssTransport::new(&format!("ws://{}", addr), Some("stale".into())).unwrap();
    assert!(matches!(transport.connect().await, Err(TransportError::Auth(_))));

    let addr = rejecting_server(StatusCode::TOO_MANY_REQUESTS).await;
    let (mut transport, _events) = WssTransport::new(&format!("ws://{}", addr), None).unwrap();
    assert!(matches!(
        transport.connect().await,
        Err(TransportError::RateLimited(_))
    ));

    let addr = rejecting_server(StatusCode::SERVICE_UNAVAILABLE).await;
    let (mut transport, _events) = WssTransport::new(&format!("ws://{}", addr), None).unwrap();
    assert!(matches!(transport.connect().await, Err(TransportError::Network(_))));
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (mut transport, _events) = WssTransport::new(&format!("ws://{}", addr), None).unwrap();
    assert!(matches!(transport.connect().await, Err(TransportError::Network(_))));
}

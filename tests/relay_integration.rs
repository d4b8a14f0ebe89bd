//! End-to-end relay tests
//!
//! Runs the real router on an ephemeral port against a mock realtime model
//! server, then drives the telephony and observer legs over real WebSockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_hdr_async, connect_async};

use voice_relay::{Leg, RelayNotification, ServerConfig, routes, state::AppState};

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Mock realtime model: records the Authorization header, forwards every
/// received frame to the test and sends whatever the test pushes.
struct MockModel {
    addr: SocketAddr,
    authorization: Arc<Mutex<Option<String>>>,
    received: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

async fn start_mock_model() -> MockModel {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let authorization = Arc::new(Mutex::new(None));
    let (received_tx, received) = mpsc::unbounded_channel();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

    let captured = authorization.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            *captured.lock() = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            Ok(response)
        };
        let socket = accept_hdr_async(stream, callback).await.unwrap();
        let (mut sink, mut source) = socket.split();

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = source.next().await {
            if let Message::Text(text) = message {
                let _ = received_tx.send(text.to_string());
            }
        }
    });

    MockModel {
        addr,
        authorization,
        received,
        outgoing,
    }
}

fn test_config(model_addr: SocketAddr) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 8081,
        public_url: "https://relay.example.com".to_string(),
        openai_api_key: Some("sk-test".to_string()),
        model_url: format!("ws://{}/v1/realtime", model_addr),
        model: "gpt-4o-realtime-preview".to_string(),
        reconnect_max_attempts: 0,
        reconnect_base_delay_ms: 1000,
        close_timeout_ms: 1000,
        weather_api_url: "http://127.0.0.1:9/forecast".to_string(),
        function_timeout_ms: 1000,
        cors_allowed_origins: "*".to_string(),
    }
}

async fn start_server(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config).unwrap();
    let app = routes::api::create_api_router()
        .merge(routes::relay::create_relay_router())
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr, path: &str) -> ClientSocket {
    let (socket, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    socket
}

async fn wait_for(
    notifications: &mut broadcast::Receiver<RelayNotification>,
    predicate: impl Fn(&RelayNotification) -> bool,
) -> RelayNotification {
    timeout(WAIT, async {
        loop {
            let notification = notifications.recv().await.unwrap();
            if predicate(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification not received")
}

async fn next_json(socket: &mut ClientSocket) -> Value {
    timeout(WAIT, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("frame not received")
}

async fn next_model_frame(model: &mut MockModel) -> Value {
    let text = timeout(WAIT, model.received.recv())
        .await
        .expect("model frame not received")
        .unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_call_relays_audio_between_telephony_and_model() {
    let mut model = start_mock_model().await;
    let (addr, state) = start_server(test_config(model.addr)).await;
    let mut notifications = state.relay.subscribe();

    let mut observer = connect(addr, "/logs").await;
    wait_for(&mut notifications, |n| {
        matches!(n, RelayNotification::LegConnected { leg: Leg::Observer, .. })
    })
    .await;

    let mut telephony = connect(addr, "/call").await;
    wait_for(&mut notifications, |n| {
        matches!(n, RelayNotification::LegConnected { leg: Leg::Telephony, .. })
    })
    .await;

    telephony
        .send(Message::text(
            json!({"event": "start", "start": {"streamSid": "MZ42"}}).to_string(),
        ))
        .await
        .unwrap();

    let update = next_model_frame(&mut model).await;
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["voice"], "ash");
    assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
    assert_eq!(model.authorization.lock().as_deref(), Some("Bearer sk-test"));

    telephony
        .send(Message::text(
            json!({"event": "media", "media": {"timestamp": "120", "payload": "AQID"}})
                .to_string(),
        ))
        .await
        .unwrap();
    let append = next_model_frame(&mut model).await;
    assert_eq!(
        append,
        json!({"type": "input_audio_buffer.append", "audio": "AQID"})
    );

    let delta = json!({
        "type": "response.audio.delta",
        "response_id": "resp_1",
        "item_id": "item_1",
        "delta": "BAUG"
    });
    model.outgoing.send(delta.to_string()).unwrap();

    assert_eq!(
        next_json(&mut telephony).await,
        json!({"event": "media", "streamSid": "MZ42", "media": {"payload": "BAUG"}})
    );
    assert_eq!(
        next_json(&mut telephony).await,
        json!({"event": "mark", "streamSid": "MZ42"})
    );
    assert_eq!(next_json(&mut observer).await, delta);
}

#[tokio::test]
async fn test_observer_update_is_applied_on_model_connect() {
    let mut model = start_mock_model().await;
    let (addr, state) = start_server(test_config(model.addr)).await;
    let mut notifications = state.relay.subscribe();

    let mut observer = connect(addr, "/logs").await;
    wait_for(&mut notifications, |n| {
        matches!(n, RelayNotification::LegConnected { leg: Leg::Observer, .. })
    })
    .await;

    observer
        .send(Message::text(
            json!({"type": "session.update", "session": {"voice": "verse", "instructions": "Be brief"}})
                .to_string(),
        ))
        .await
        .unwrap();
    // Let the override land before the call starts
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut telephony = connect(addr, "/call").await;
    telephony
        .send(Message::text(
            json!({"event": "start", "start": {"streamSid": "MZ7"}}).to_string(),
        ))
        .await
        .unwrap();

    let update = next_model_frame(&mut model).await;
    assert_eq!(update["session"]["voice"], "verse");
    assert_eq!(update["session"]["instructions"], "Be brief");
    assert_eq!(update["session"]["output_audio_format"], "g711_ulaw");
}

#[tokio::test]
async fn test_unknown_websocket_path_is_closed() {
    let model = start_mock_model().await;
    let (addr, _state) = start_server(test_config(model.addr)).await;

    let mut socket = connect(addr, "/elsewhere").await;
    let outcome = timeout(WAIT, socket.next()).await.expect("socket not closed");
    assert!(matches!(
        outcome,
        None | Some(Ok(Message::Close(_))) | Some(Err(_))
    ));
}

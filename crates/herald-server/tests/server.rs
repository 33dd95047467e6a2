//! HTTP and WebSocket behaviour of a running server.

use futures_util::{SinkExt, StreamExt};
use herald_server::{config::Config, serve, spawn_hub, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

const WAIT: Duration = Duration::from_secs(5);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = spawn_hub(&config);
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(serve(listener, AppState::new(hub, config), async {
            stopped.await.ok();
        }));

        Self {
            addr,
            stop: Some(stop),
            task,
        }
    }

    async fn connect(&self, path: &str) -> (Ws, String) {
        let (mut ws, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        let greeting = recv(&mut ws).await;
        assert_eq!(greeting["event"], "connected");
        let id = greeting["data"]["connectionId"].as_str().unwrap().to_string();
        (ws, id)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        timeout(WAIT, stream.read_to_string(&mut raw))
            .await
            .unwrap()
            .unwrap();

        let status: u16 = raw
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default();
        (status, serde_json::from_str(body).unwrap_or(Value::Null))
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        timeout(WAIT, self.task).await.unwrap().unwrap().unwrap();
    }
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(ws: &mut Ws, event: &str, data: Value) {
    let text = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::Text(text)).await.unwrap();
}

async fn sync(ws: &mut Ws) {
    send(ws, "ping", Value::Null).await;
    assert_eq!(recv(ws).await, json!({"event": "pong", "data": "pong"}));
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.metrics.enabled = false;
    config
}

#[tokio::test]
async fn test_both_paths_share_one_hub() {
    let server = TestServer::start(test_config()).await;
    let (mut a, _) = server.connect("/notifications").await;
    let (mut b, _) = server.connect("/users").await;

    send(&mut a, "chat_message", json!({"text": "hi"})).await;

    let expected = json!({"event": "new_chat_message", "data": {"text": "hi"}});
    assert_eq!(recv(&mut a).await, expected);
    assert_eq!(recv(&mut b).await, expected);

    server.stop().await;
}

#[tokio::test]
async fn test_typing_relay_requires_user() {
    let server = TestServer::start(test_config()).await;
    let (mut anonymous, _) = server.connect("/notifications").await;
    let (mut user, _) = server.connect("/notifications").await;

    send(&mut anonymous, "user_typing", Value::Null).await;
    sync(&mut anonymous).await;

    send(&mut user, "subscribe_user", json!(5)).await;
    send(&mut user, "user_typing", Value::Null).await;

    let expected = json!({"event": "user_typing", "data": {"userId": 5, "typing": true}});
    assert_eq!(recv(&mut anonymous).await, expected);
    assert_eq!(recv(&mut user).await, expected);

    send(&mut user, "user_stopped_typing", Value::Null).await;
    let stopped = recv(&mut anonymous).await;
    assert_eq!(stopped["data"]["typing"], false);

    server.stop().await;
}

#[tokio::test]
async fn test_health_and_status() {
    let server = TestServer::start(test_config()).await;
    let (mut ws, id) = server.connect("/notifications").await;
    send(&mut ws, "subscribe_user", json!(11)).await;
    send(&mut ws, "join_group", json!("admins")).await;
    sync(&mut ws).await;

    let (status, health) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["socket_clients"], 1);
    assert!(health["timestamp"].is_string());

    let (status, body) = server.get("/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["connected_clients"], 1);
    assert_eq!(
        body["clients"][id.as_str()],
        json!({"id": id, "userId": 11, "groups": ["admins"]})
    );
    assert_eq!(body["endpoints"]["users"], "/users");
    assert_eq!(
        body["events"],
        json!(["chat_message", "user_stopped_typing", "user_typing"])
    );

    let (status, index) = server.get("/").await;
    assert_eq!(status, 200);
    assert_eq!(index["status"], "running");

    server.stop().await;
}

#[tokio::test]
async fn test_connection_limit() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let server = TestServer::start(config).await;

    let (_first, _) = server.connect("/notifications").await;

    match connect_async(format!("ws://{}/notifications", server.addr)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 503),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second connection should be refused"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_sockets() {
    let server = TestServer::start(test_config()).await;
    let (mut ws, _) = server.connect("/notifications").await;

    server.stop().await;

    let mut closed = false;
    while let Ok(Some(message)) = timeout(WAIT, ws.next()).await {
        match message {
            Ok(Message::Close(_)) | Err(_) => {
                closed = true;
                break;
            }
            Ok(_) => {}
        }
    }
    assert!(closed);
}

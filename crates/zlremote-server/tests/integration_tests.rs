//! Integration tests for the ZLRemote signaling server
//!
//! Each test starts the real application on a random local port and drives
//! it with WebSocket clients.
//!
//! Run with: cargo test -p zlremote-server --test integration_tests

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zlremote_protocol::{ClientMessage, ConnectionId, ErrorCode, ServerMessage, SessionId};
use zlremote_server::api::HealthResponse;
use zlremote_server::state::Config;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        probe_interval: Duration::from_secs(60),
        adaptive_quality: false,
        ..Config::default()
    }
}

/// Test helper to start a test server
async fn start_test_server() -> TestServer {
    TestServer::start(test_config())
        .await
        .expect("Failed to start test server")
}

/// Test server wrapper
struct TestServer {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    tasks: CancellationToken,
}

impl TestServer {
    async fn start(config: Config) -> anyhow::Result<Self> {
        let (router, state) = zlremote_server::create_app(config.clone());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
        let addr = listener.local_addr()?;

        let tasks = CancellationToken::new();
        tokio::spawn(zlremote_server::tasks::start_liveness_sweeper(
            state.router.clone(),
            config.sweep_interval,
            config.liveness_timeout,
            tasks.clone(),
        ));

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            tasks,
        })
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn health(&self) -> anyhow::Result<HealthResponse> {
        let response = Client::new()
            .get(format!("{}/health", self.http_url()))
            .send()
            .await?;
        Ok(response.json().await?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.tasks.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Connect and read the assigned connection id
async fn connect_client(ws_url: &str) -> anyhow::Result<(WsStream, ConnectionId)> {
    let (mut ws, _) = connect_async(ws_url).await?;

    match recv(&mut ws).await {
        ServerMessage::ClientId { client_id } => Ok((ws, client_id)),
        other => Err(anyhow::anyhow!("Expected client_id, got {:?}", other)),
    }
}

async fn send(ws: &mut WsStream, message: &ClientMessage) {
    ws.send(Message::Text(serde_json::to_string(message).unwrap().into()))
        .await
        .expect("Failed to send message");
}

/// Next server message, skipping control frames
async fn recv(ws: &mut WsStream) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("Failed to parse message");
        }
    }
}

/// Assert nothing but control frames arrives for a while
async fn expect_silence(ws: &mut WsStream, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(frame) = tokio::time::timeout_at(deadline, ws.next()).await {
        if let Some(Ok(Message::Text(text))) = frame {
            panic!("Expected silence, got {}", text.as_str());
        }
    }
}

async fn register_host(ws: &mut WsStream, password: Option<&str>) -> SessionId {
    send(
        ws,
        &ClientMessage::RegisterHost {
            password: password.map(String::from),
            device_info: Some(json!({ "platform": "test" })),
        },
    )
    .await;

    match recv(ws).await {
        ServerMessage::HostRegistered { session_id } => session_id,
        other => panic!("Expected HostRegistered, got {:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_test_server().await;

    let health = server.health().await.expect("Health request failed");
    assert_eq!(health.status, "healthy");
    assert_eq!(health.connections, 0);
    assert_eq!(health.sessions, 0);

    let (mut host, _) = connect_client(&server.ws_url()).await.unwrap();
    register_host(&mut host, None).await;

    let health = server.health().await.unwrap();
    assert_eq!(health.connections, 1);
    assert_eq!(health.sessions, 1);
}

#[tokio::test]
async fn test_example_scenario() {
    let server = start_test_server().await;

    let (mut host, host_id) = connect_client(&server.ws_url()).await.unwrap();
    let (mut viewer, viewer_id) = connect_client(&server.ws_url()).await.unwrap();

    let session_id = register_host(&mut host, None).await;
    assert_eq!(session_id.as_str().len(), 8);

    // Viewer joins with a lowercase code
    let join = json!({
        "type": "connect_to_host",
        "sessionId": session_id.as_str().to_lowercase(),
    });
    viewer
        .send(Message::Text(join.to_string().into()))
        .await
        .unwrap();
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::ViewerJoined { viewer_id }
    );
    assert_eq!(
        recv(&mut viewer).await,
        ServerMessage::ConnectedToHost {
            session_id: session_id.clone()
        }
    );

    // Host offers
    send(
        &mut host,
        &ClientMessage::WebrtcOffer {
            offer: json!({ "type": "offer", "sdp": "v=0" }),
            viewer_id: None,
        },
    )
    .await;
    assert_eq!(
        recv(&mut viewer).await,
        ServerMessage::WebrtcOffer {
            offer: json!({ "type": "offer", "sdp": "v=0" }),
            host_id
        }
    );

    // Candidate before the answer is held back
    send(
        &mut viewer,
        &ClientMessage::IceCandidate {
            candidate: json!({ "candidate": "candidate:1 1 udp 1 10.0.0.2 5000 typ host" }),
            viewer_id: None,
        },
    )
    .await;
    expect_silence(&mut host, Duration::from_millis(200)).await;

    // Answer releases it
    send(
        &mut viewer,
        &ClientMessage::WebrtcAnswer {
            answer: json!({ "type": "answer", "sdp": "v=0" }),
        },
    )
    .await;
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::WebrtcAnswer {
            answer: json!({ "type": "answer", "sdp": "v=0" }),
            viewer_id
        }
    );
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::IceCandidate {
            candidate: json!({ "candidate": "candidate:1 1 udp 1 10.0.0.2 5000 typ host" }),
            sender_id: viewer_id
        }
    );

    // Input flows viewer to host
    send(
        &mut viewer,
        &ClientMessage::InputEvent {
            data: json!({ "type": "key", "key": "a" }),
        },
    )
    .await;
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::InputEvent {
            data: json!({ "type": "key", "key": "a" }),
            viewer_id
        }
    );
}

#[tokio::test]
async fn test_join_errors() {
    let server = start_test_server().await;

    let (mut host, _) = connect_client(&server.ws_url()).await.unwrap();
    let (mut viewer, _) = connect_client(&server.ws_url()).await.unwrap();
    let session_id = register_host(&mut host, Some("hunter2")).await;

    send(
        &mut viewer,
        &ClientMessage::ConnectToHost {
            session_id: SessionId::new("NOSUCH00"),
            password: None,
        },
    )
    .await;
    assert_eq!(
        recv(&mut viewer).await,
        ServerMessage::Error {
            code: ErrorCode::SessionNotFound,
            message: "Session not found".to_string()
        }
    );

    send(
        &mut viewer,
        &ClientMessage::ConnectToHost {
            session_id: session_id.clone(),
            password: Some("wrong".to_string()),
        },
    )
    .await;
    assert_eq!(
        recv(&mut viewer).await,
        ServerMessage::Error {
            code: ErrorCode::InvalidPassword,
            message: "Invalid password".to_string()
        }
    );

    // The host heard nothing about the failed attempts
    expect_silence(&mut host, Duration::from_millis(200)).await;

    send(
        &mut viewer,
        &ClientMessage::ConnectToHost {
            session_id: session_id.clone(),
            password: Some("hunter2".to_string()),
        },
    )
    .await;
    assert_eq!(
        recv(&mut viewer).await,
        ServerMessage::ConnectedToHost { session_id }
    );
}

#[tokio::test]
async fn test_host_disconnect_notifies_viewers() {
    let server = start_test_server().await;

    let (mut host, _) = connect_client(&server.ws_url()).await.unwrap();
    let session_id = register_host(&mut host, None).await;

    let mut viewers = Vec::new();
    for _ in 0..2 {
        let (mut viewer, _) = connect_client(&server.ws_url()).await.unwrap();
        send(
            &mut viewer,
            &ClientMessage::ConnectToHost {
                session_id: session_id.clone(),
                password: None,
            },
        )
        .await;
        assert!(matches!(
            recv(&mut viewer).await,
            ServerMessage::ConnectedToHost { .. }
        ));
        assert!(matches!(recv(&mut host).await, ServerMessage::ViewerJoined { .. }));
        viewers.push(viewer);
    }

    host.close(None).await.unwrap();

    for viewer in &mut viewers {
        assert_eq!(recv(viewer).await, ServerMessage::HostDisconnected);
        expect_silence(viewer, Duration::from_millis(100)).await;
    }

    let health = server.health().await.unwrap();
    assert_eq!(health.sessions, 0);
    assert_eq!(health.connections, 2);
}

#[tokio::test]
async fn test_viewer_disconnect_notifies_host() {
    let server = start_test_server().await;

    let (mut host, _) = connect_client(&server.ws_url()).await.unwrap();
    let (mut viewer, viewer_id) = connect_client(&server.ws_url()).await.unwrap();
    let session_id = register_host(&mut host, None).await;

    send(
        &mut viewer,
        &ClientMessage::ConnectToHost {
            session_id,
            password: None,
        },
    )
    .await;
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::ViewerJoined { viewer_id }
    );

    viewer.close(None).await.unwrap();

    assert_eq!(
        recv(&mut host).await,
        ServerMessage::ViewerLeft { viewer_id }
    );
    expect_silence(&mut host, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let server = start_test_server().await;
    let (mut client, _) = connect_client(&server.ws_url()).await.unwrap();

    client
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    client
        .send(Message::Text(r#"{"type":"chat_message","text":"hi"}"#.into()))
        .await
        .unwrap();
    // Offer from a connection that is not a host
    send(
        &mut client,
        &ClientMessage::WebrtcOffer {
            offer: json!({}),
            viewer_id: None,
        },
    )
    .await;

    send(&mut client, &ClientMessage::Ping).await;
    assert_eq!(recv(&mut client).await, ServerMessage::Pong);
}

#[tokio::test]
async fn test_probe_reports_network_stats() {
    let config = Config {
        probe_interval: Duration::from_millis(200),
        adaptive_quality: true,
        ..test_config()
    };
    let server = TestServer::start(config).await.unwrap();
    let (mut client, _) = connect_client(&server.ws_url()).await.unwrap();

    // Reading lets the client answer the server's pings
    let mut saw_stats = false;
    let mut saw_quality = false;
    while !(saw_stats && saw_quality) {
        match recv(&mut client).await {
            ServerMessage::NetworkStats { packet_loss, .. } => {
                assert_eq!(packet_loss, 0.0);
                saw_stats = true;
            }
            ServerMessage::QualityChange { fps, .. } => {
                assert!(fps >= 10);
                saw_quality = true;
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_silent_connection_expires() {
    let config = Config {
        liveness_timeout: Duration::from_secs(1),
        sweep_interval: Duration::from_millis(200),
        ..test_config()
    };
    let server = TestServer::start(config).await.unwrap();
    let (mut client, _) = connect_client(&server.ws_url()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "Connection was not closed");

    let health = server.health().await.unwrap();
    assert_eq!(health.connections, 0);
}

#[tokio::test]
async fn test_unknown_connection_ids_are_distinct() {
    let server = start_test_server().await;

    let (_a, a_id) = connect_client(&server.ws_url()).await.unwrap();
    let (_b, b_id) = connect_client(&server.ws_url()).await.unwrap();
    assert_ne!(a_id, b_id);
    assert_ne!(a_id, Uuid::nil());
}

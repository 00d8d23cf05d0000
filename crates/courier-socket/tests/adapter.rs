// End-to-end adapter behaviour over in-memory gateway connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_channels::{
    Adapter, AdapterConfig, ChannelError, ChannelType, Destination, IncomingMessage,
    MessageHandler, SendRequest,
};
use courier_socket::{
    Connector, FrameTransport, GatewayFrame, MemoryTransport, SessionError, SocketAdapter,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct QueueConnector {
    connects: AtomicUsize,
    servers: mpsc::UnboundedSender<MemoryTransport>,
}

#[async_trait]
impl Connector for QueueConnector {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = MemoryTransport::pair();
        self.servers.send(server).map_err(|_| SessionError::Closed)?;
        Ok(Box::new(client))
    }
}

struct Collect(mpsc::UnboundedSender<IncomingMessage>);

#[async_trait]
impl MessageHandler for Collect {
    async fn handle_incoming(&self, msg: &IncomingMessage) -> anyhow::Result<()> {
        self.0.send(msg.clone())?;
        Ok(())
    }
}

fn config(token: Option<&str>, api_base: Option<&str>) -> AdapterConfig {
    let mut options = HashMap::new();
    if let Some(base) = api_base {
        options.insert("api_base".to_string(), base.to_string());
    }
    AdapterConfig {
        token: token.map(str::to_string),
        options,
        ..Default::default()
    }
}

fn adapter(
    config: AdapterConfig,
) -> (
    SocketAdapter,
    Arc<QueueConnector>,
    mpsc::UnboundedReceiver<MemoryTransport>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(QueueConnector {
        connects: AtomicUsize::new(0),
        servers: tx,
    });
    let adapter = SocketAdapter::new("dc", "Discord", ChannelType::Discord, config)
        .unwrap()
        .with_connector(connector.clone());
    (adapter, connector, rx)
}

async fn handshake(server: &mut MemoryTransport) {
    server
        .send(GatewayFrame::hello(41_250).to_text())
        .await
        .unwrap();
    let identify: GatewayFrame =
        serde_json::from_str(&server.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(identify.op, 2);
    server
        .send(GatewayFrame::dispatch(1, "READY", json!({ "user": { "id": "bot" } })).to_text())
        .await
        .unwrap();
}

/// Start the adapter while playing the server side of the first handshake.
async fn start_connected(
    adapter: &SocketAdapter,
    servers: &mut mpsc::UnboundedReceiver<MemoryTransport>,
) -> MemoryTransport {
    let (started, server) = tokio::join!(adapter.start(), async {
        let mut server = servers.recv().await.unwrap();
        handshake(&mut server).await;
        server
    });
    started.unwrap();
    server
}

struct Refusing {
    connects: AtomicUsize,
}

#[async_trait]
impl Connector for Refusing {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Err(SessionError::Connect("connection refused".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn start_twice_opens_one_connection() {
    let (adapter, connector, mut servers) = adapter(config(Some("tok"), None));

    let _server = start_connected(&adapter, &mut servers).await;
    adapter.start().await.unwrap();

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.state().mode, "websocket");
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn missing_token_refuses_to_start() {
    let (adapter, connector, _servers) = adapter(config(None, None));

    let err = adapter.start().await.unwrap_err();
    assert!(matches!(err, ChannelError::ConfigError(_)));
    assert!(!adapter.is_running());
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_reach_the_handler() {
    let (adapter, _connector, mut servers) = adapter(config(Some("tok"), None));
    let (tx, mut inbox) = mpsc::unbounded_channel();
    adapter.set_handler(Arc::new(Collect(tx)));
    let mut server = start_connected(&adapter, &mut servers).await;

    let create = GatewayFrame::dispatch(
        1,
        "MESSAGE_CREATE",
        json!({
            "id": "m1",
            "channel_id": "c1",
            "author": { "id": "u1", "username": "alice" },
            "content": "hi there",
        }),
    );
    server.send(create.to_text()).await.unwrap();

    let msg = inbox.recv().await.unwrap();
    assert_eq!(msg.text, "hi there");
    assert_eq!(msg.channel_type, ChannelType::Discord);
    assert_eq!(adapter.state().message_count, 1);
    adapter.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropped_session_reconnects_after_five_seconds() {
    let (adapter, connector, mut servers) = adapter(config(Some("tok"), None));
    let first = start_connected(&adapter, &mut servers).await;
    let dropped_at = Instant::now();
    drop(first);

    let mut second = servers.recv().await.unwrap();
    let waited = dropped_at.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    assert!(adapter.is_running());
    assert!(adapter.state().last_error.unwrap().contains("closed"));

    handshake(&mut second).await;
    adapter.stop().await.unwrap();
    assert!(!adapter.is_running());

    // No reconnect after a clean stop.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn send_requires_running_adapter() {
    let (adapter, _connector, _servers) = adapter(config(Some("tok"), None));
    let req = SendRequest::text(Destination::chat(ChannelType::Discord, "c1"), "hi");
    let err = adapter.send(&req).await.unwrap_err();
    assert!(matches!(err, ChannelError::NotRunning));
}

#[tokio::test]
async fn send_posts_to_thread_when_present() {
    let mut api = mockito::Server::new_async().await;
    let mock = api
        .mock("POST", "/channels/t9/messages")
        .match_header("authorization", "Bot tok")
        .with_status(200)
        .with_body(r#"{"id":"m2"}"#)
        .create_async()
        .await;

    let (adapter, _connector, mut servers) = adapter(config(Some("tok"), Some(&api.url())));
    let _server = start_connected(&adapter, &mut servers).await;

    let mut to = Destination::chat(ChannelType::Discord, "c1");
    to.thread_id = Some("t9".into());
    let res = adapter.send(&SendRequest::text(to, "reply")).await.unwrap();

    assert!(res.success);
    assert_eq!(res.message_id.as_deref(), Some("m2"));
    assert!(adapter.state().last_outbound_at.is_some());
    mock.assert_async().await;
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn probe_reports_bot_identity() {
    let mut api = mockito::Server::new_async().await;
    api.mock("GET", "/users/@me")
        .with_status(200)
        .with_body(r#"{"id":"42","username":"courier-bot"}"#)
        .create_async()
        .await;

    let (adapter, _connector, _servers) = adapter(config(Some("tok"), Some(&api.url())));
    let probe = adapter.probe().await.unwrap();

    assert!(probe.ok);
    assert_eq!(probe.bot_id.as_deref(), Some("42"));
    assert_eq!(probe.bot_name.as_deref(), Some("courier-bot"));
    assert!(!adapter.is_running());
}

#[tokio::test(start_paused = true)]
async fn unreachable_gateway_fails_start() {
    let connector = Arc::new(Refusing {
        connects: AtomicUsize::new(0),
    });
    let adapter = SocketAdapter::new("dc", "Discord", ChannelType::Discord, config(Some("tok"), None))
        .unwrap()
        .with_connector(connector.clone());

    let err = adapter.start().await.unwrap_err();

    assert!(matches!(err, ChannelError::ConnectionFailed(_)), "{err}");
    assert!(!adapter.is_running());
    assert!(adapter.state().last_error.unwrap().contains("connection refused"));

    // A failed start leaves nothing retrying in the background.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_identify_fails_start() {
    let (adapter, _connector, mut servers) = adapter(config(Some("bad"), None));

    let (started, _server) = tokio::join!(adapter.start(), async {
        let mut server = servers.recv().await.unwrap();
        server
            .send(GatewayFrame::hello(41_250).to_text())
            .await
            .unwrap();
        server.recv().await.unwrap().unwrap();
        server.send(r#"{"op":9,"d":false}"#.into()).await.unwrap();
        server
    });

    assert!(started.is_err());
    assert!(!adapter.is_running());
}

#[tokio::test(start_paused = true)]
async fn silent_gateway_times_out_start() {
    let (adapter, _connector, mut servers) = adapter(config(Some("tok"), None));

    let started_at = Instant::now();
    let (started, _server) = tokio::join!(adapter.start(), servers.recv());

    let err = started.unwrap_err();
    assert!(matches!(err, ChannelError::Timeout { ms: 10_000 }), "{err}");
    assert_eq!(started_at.elapsed(), Duration::from_secs(10));
    assert!(!adapter.is_running());
}

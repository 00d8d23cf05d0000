//! Drives `RpcAdapter` against a scripted `sh` daemon speaking the same
//! line protocol as signal-cli.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use courier_channels::{
    Adapter, AdapterConfig, ChannelError, ChannelType, ChatType, Destination, IncomingMessage,
    MessageHandler, ReactionRequest, SendRequest,
};
use courier_rpc::RpcAdapter;

const RECEIVE: &str = r#"{"jsonrpc":"2.0","method":"receive","params":{"envelope":{"sourceNumber":"+15550001","sourceName":"Ann","timestamp":1700000000123,"dataMessage":{"timestamp":1700000000123,"message":"hello from signal"}},"account":"+15559999"}}"#;

/// A daemon that answers every request it understands and logs the
/// interesting ones to `log`. With `exit_after_subscribe` it dies right after
/// acknowledging the subscription.
fn daemon_script(log: &Path, exit_after_subscribe: bool) -> String {
    let log = log.display();
    let after_subscribe = if exit_after_subscribe { "sleep 0.3; exit 0" } else { ":" };
    format!(
        r#"echo spawn >> '{log}'
reply() {{ echo "{{\"jsonrpc\":\"2.0\",\"id\":$1,\"result\":$2}}"; }}
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"subscribeReceive"'*)
      reply "$id" 7
      echo '{RECEIVE}'
      {after_subscribe};;
    *'"method":"unsubscribeReceive"'*)
      echo "$line" >> '{log}'
      reply "$id" null;;
    *'"method":"send"'*)
      echo "$line" >> '{log}'
      reply "$id" '{{"timestamp":1700000000999}}';;
    *'"method":"sendReaction"'*)
      echo "$line" >> '{log}'
      reply "$id" '{{"timestamp":1700000001000}}';;
    *'"method":"version"'*)
      reply "$id" '{{"version":"0.13.4"}}';;
  esac
done"#
    )
}

fn adapter(log: &Path, exit_after_subscribe: bool) -> RpcAdapter {
    let config = AdapterConfig {
        options: [("account".to_string(), "+15559999".to_string())].into(),
        ..Default::default()
    };
    RpcAdapter::new("sig", "Signal", ChannelType::Signal, config).with_command(
        "sh",
        vec!["-c".to_string(), daemon_script(log, exit_after_subscribe)],
    )
}

fn log_lines(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn spawns(log: &Path) -> usize {
    log_lines(log).iter().filter(|l| *l == "spawn").count()
}

#[derive(Default)]
struct Collect(Mutex<Vec<IncomingMessage>>);

#[async_trait]
impl MessageHandler for Collect {
    async fn handle_incoming(&self, msg: &IncomingMessage) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

async fn wait_until(what: &str, limit: Duration, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + limit;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn receive_send_and_stop() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("daemon.log");
    let handler = Arc::new(Collect::default());
    let adapter = adapter(&log, false);
    adapter.set_handler(handler.clone());

    adapter.start().await.unwrap();
    adapter.start().await.unwrap();
    assert!(adapter.is_running());
    assert_eq!(adapter.state().mode, "rpc");

    wait_until("inbound message", Duration::from_secs(5), || {
        !handler.0.lock().unwrap().is_empty()
    })
    .await;
    let inbound = handler.0.lock().unwrap()[0].clone();
    assert_eq!(inbound.text, "hello from signal");
    assert_eq!(inbound.chat_type, ChatType::Direct);
    assert_eq!(inbound.id, "1700000000123");

    let reply = SendRequest {
        reply_to: Some(inbound.id.clone()),
        ..SendRequest::text(Destination::reply_to(&inbound), "pong")
    };
    let result = adapter.send(&reply).await.unwrap();
    assert_eq!(result.message_id.as_deref(), Some("1700000000999"));

    adapter
        .send_reaction(&ReactionRequest {
            to: Destination::reply_to(&inbound),
            message_id: inbound.id.clone(),
            emoji: "👍".into(),
            remove: false,
        })
        .await
        .unwrap();

    let probe = adapter.probe().await.unwrap();
    assert!(probe.ok);
    assert_eq!(probe.detail.as_deref(), Some("0.13.4"));

    let started = Instant::now();
    adapter.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!adapter.is_running());

    let lines = log_lines(&log);
    assert_eq!(spawns(&log), 1);
    let send = lines.iter().find(|l| l.contains(r#""method":"send""#)).unwrap();
    assert!(send.contains(r#""recipient":["+15550001"]"#), "{send}");
    assert!(send.contains(r#""quoteTimestamp":1700000000123"#), "{send}");
    let reaction = lines.iter().find(|l| l.contains("sendReaction")).unwrap();
    assert!(reaction.contains(r#""targetAuthor":"+15550001""#), "{reaction}");
    let unsubscribe = lines
        .iter()
        .find(|l| l.contains("unsubscribeReceive"))
        .unwrap();
    assert!(unsubscribe.contains(r#""subscription":7"#), "{unsubscribe}");

    assert!(matches!(
        adapter.send(&reply).await.unwrap_err(),
        ChannelError::NotRunning
    ));
}

#[tokio::test]
async fn missing_binary_fails_start() {
    let adapter = RpcAdapter::new("sig", "Signal", ChannelType::Signal, AdapterConfig::default())
        .with_command("courier-no-such-binary-42", vec![]);

    let err = adapter.start().await.unwrap_err();

    assert!(matches!(err, ChannelError::ConnectionFailed(_)), "{err}");
    assert!(!adapter.is_running());
    assert!(adapter.state().last_error.is_some());
}

#[tokio::test]
async fn daemon_that_never_subscribes_fails_start() {
    let adapter = RpcAdapter::new("sig", "Signal", ChannelType::Signal, AdapterConfig::default())
        .with_command("sh", vec!["-c".to_string(), "read line; exit 1".to_string()]);

    let err = adapter.start().await.unwrap_err();

    assert!(matches!(err, ChannelError::ConnectionFailed(_)), "{err}");
    assert!(!adapter.is_running());
}

#[tokio::test]
async fn exited_daemon_is_respawned() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("daemon.log");
    let adapter = adapter(&log, true);

    adapter.start().await.unwrap();
    wait_until("respawn", Duration::from_secs(12), || spawns(&log) >= 2).await;

    let state = adapter.state();
    assert!(state.running);
    assert!(state.last_error.unwrap().contains("exited"));

    adapter.stop().await.unwrap();
    let settled = spawns(&log);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(spawns(&log), settled);
}

#[tokio::test]
async fn send_during_slow_start_returns_not_running() {
    let adapter = Arc::new(
        RpcAdapter::new("sig", "Signal", ChannelType::Signal, AdapterConfig::default())
            .with_command("sh", vec!["-c".to_string(), "cat > /dev/null".to_string()]),
    );

    let starting = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.start().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!starting.is_finished());

    let req = SendRequest::text(Destination::chat(ChannelType::Signal, "+15550001"), "hi");
    let sent_at = Instant::now();
    let err = adapter.send(&req).await.unwrap_err();
    assert!(matches!(err, ChannelError::NotRunning), "{err}");
    assert!(adapter.probe().await.is_ok());
    assert!(sent_at.elapsed() < Duration::from_secs(1));

    starting.abort();
}

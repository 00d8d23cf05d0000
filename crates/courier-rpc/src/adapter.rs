use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_channels::{
    retry::{sleep_or_cancel, RECONNECT_DELAY},
    spawn_dispatcher, Adapter, AdapterConfig, BaseAdapter, Capabilities, ChannelError,
    ChannelType, ChatType, Destination, IncomingMessage, Lifecycle, MessageHandler, ProbeResult,
    ReactionRequest, RuntimeState, SendRequest, SendResult, TransportStyle,
};
use courier_core::config::HANDSHAKE_TIMEOUT_MS;

use crate::bridge::RpcBridge;
use crate::envelope::{self, GROUP_PREFIX};
use crate::error::RpcError;
use crate::protocol::RpcNotification;

pub const DEFAULT_COMMAND: &str = "signal-cli";

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How to launch the daemon, read from the adapter's `options` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcSettings {
    pub command: String,
    pub args: Vec<String>,
    pub account: Option<String>,
}

impl RpcSettings {
    /// `args` (whitespace separated) replaces the default
    /// `[-a <account>] jsonRpc --receive-mode=manual` entirely.
    pub fn from_config(config: &AdapterConfig) -> Self {
        let account = config.option("account").map(str::to_string);
        let args = match config.option("args") {
            Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
            None => {
                let mut args = Vec::new();
                if let Some(account) = &account {
                    args.extend(["-a".to_string(), account.clone()]);
                }
                args.extend(["jsonRpc".to_string(), "--receive-mode=manual".to_string()]);
                args
            }
        };
        Self {
            command: config.option_or("command", DEFAULT_COMMAND).to_string(),
            args,
            account,
        }
    }
}

/// The bridge currently serving the adapter and its receive subscription.
/// Replaced by the supervisor whenever the process is respawned.
#[derive(Default)]
struct Live {
    inner: Mutex<Option<(Arc<RpcBridge>, Option<Value>)>>,
}

impl Live {
    fn set(&self, bridge: Arc<RpcBridge>, subscription: Option<Value>) {
        *self.lock() = Some((bridge, subscription));
    }

    fn bridge(&self) -> Option<Arc<RpcBridge>> {
        self.lock().as_ref().map(|(bridge, _)| Arc::clone(bridge))
    }

    fn take(&self) -> Option<(Arc<RpcBridge>, Option<Value>)> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Arc<RpcBridge>, Option<Value>)>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Subprocess JSON-RPC adapter (signal-cli `jsonRpc` mode).
pub struct RpcAdapter {
    base: Arc<BaseAdapter>,
    settings: RpcSettings,
    lifecycle: Lifecycle<Arc<Live>>,
}

impl RpcAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        channel_type: ChannelType,
        config: AdapterConfig,
    ) -> Self {
        let capabilities = Capabilities::builder(TransportStyle::Socket)
            .chat_types(&[ChatType::Direct, ChatType::Group])
            .reactions(true)
            .media(true)
            .build();

        Self {
            base: Arc::new(BaseAdapter::new(id, name, channel_type, capabilities)),
            settings: RpcSettings::from_config(&config),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Launch `command args` instead of the configured daemon.
    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.settings.command = command.into();
        self.settings.args = args;
        self
    }

    pub fn settings(&self) -> &RpcSettings {
        &self.settings
    }

    fn running_bridge(&self) -> Result<Arc<RpcBridge>, ChannelError> {
        self.lifecycle
            .transport()
            .and_then(|live| live.bridge())
            .ok_or(ChannelError::NotRunning)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChannelError> {
        let bridge = self.running_bridge()?;
        match bridge.request(method, params, SEND_TIMEOUT).await {
            Ok(result) => {
                self.base.record_outbound();
                Ok(result)
            }
            Err(e) => {
                warn!(adapter = %self.base.id(), method, error = %e, "rpc call failed");
                Err(e.into())
            }
        }
    }
}

/// Adds `groupId` or `recipient` for `to` to `params`.
fn address(params: &mut Value, to: &Destination) {
    match to.chat_id.strip_prefix(GROUP_PREFIX) {
        Some(group) => params["groupId"] = json!(group),
        None => params["recipient"] = json!([to.chat_id]),
    }
}

fn parse_timestamp(field: &str, value: &str) -> Result<i64, ChannelError> {
    value
        .parse()
        .map_err(|_| ChannelError::SendFailed(format!("{field} must be a millisecond timestamp: {value}")))
}

#[async_trait]
impl Adapter for RpcAdapter {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn channel_type(&self) -> ChannelType {
        self.base.channel_type()
    }

    fn capabilities(&self) -> &Capabilities {
        self.base.capabilities()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        self.lifecycle
            .start(&self.base, "rpc", |cancel| async move {
                let (bridge, notifications, subscription) =
                    connect(&self.base, &self.settings).await?;
                let live = Arc::new(Live::default());
                live.set(bridge, subscription);

                let (events, dispatcher) = spawn_dispatcher(Arc::clone(&self.base), cancel.clone());
                let supervisor = tokio::spawn(supervise(
                    Arc::clone(&self.base),
                    self.settings.clone(),
                    Arc::clone(&live),
                    notifications,
                    events,
                    cancel,
                ));
                Ok((live, vec![supervisor, dispatcher]))
            })
            .await
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        let id = self.base.id().to_string();
        self.lifecycle
            .stop(&self.base, |live| async move {
                if let Some((bridge, subscription)) = live.take() {
                    release(&id, &bridge, subscription).await;
                }
            })
            .await
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    async fn probe(&self) -> Result<ProbeResult, ChannelError> {
        let started = Instant::now();

        if let Ok(bridge) = self.running_bridge() {
            let result = bridge.request("version", json!({}), PROBE_TIMEOUT).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(match result {
                Ok(version) => ProbeResult {
                    bot_id: self.settings.account.clone(),
                    detail: version
                        .get("version")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    ..ProbeResult::healthy(elapsed_ms)
                },
                Err(e) => ProbeResult::unhealthy(elapsed_ms, e.to_string()),
            });
        }

        let elapsed_ms = || started.elapsed().as_millis() as u64;
        Ok(match which::which(&self.settings.command) {
            Ok(path) => ProbeResult {
                bot_id: self.settings.account.clone(),
                detail: Some(path.display().to_string()),
                ..ProbeResult::healthy(elapsed_ms())
            },
            Err(e) => ProbeResult::unhealthy(
                elapsed_ms(),
                format!("{} not found: {e}", self.settings.command),
            ),
        })
    }

    async fn send(&self, req: &SendRequest) -> Result<SendResult, ChannelError> {
        let mut message = req.text.clone();
        for url in req.attachments.iter().filter_map(|a| a.url.as_deref()) {
            message.push('\n');
            message.push_str(url);
        }

        let mut params = json!({ "message": message });
        address(&mut params, &req.to);
        if let Some(account) = &self.settings.account {
            params["account"] = json!(account);
        }
        if let Some(reply) = &req.reply_to {
            params["quoteTimestamp"] = json!(parse_timestamp("reply_to", reply)?);
            if let Some(author) = &req.to.user_id {
                params["quoteAuthor"] = json!(author);
            }
        }

        let result = self.call("send", params).await?;
        let message_id = result
            .get("timestamp")
            .and_then(Value::as_i64)
            .map(|ts| ts.to_string());
        debug!(adapter = %self.base.id(), chat_id = %req.to.chat_id, ?message_id, "message sent");
        Ok(SendResult::ok(message_id))
    }

    async fn send_reaction(&self, req: &ReactionRequest) -> Result<(), ChannelError> {
        // Direct chats are keyed by the peer, who authored the target unless told otherwise.
        let author = match (&req.to.user_id, req.to.chat_id.starts_with(GROUP_PREFIX)) {
            (Some(user), _) => user.clone(),
            (None, false) => req.to.chat_id.clone(),
            (None, true) => {
                return Err(ChannelError::SendFailed(
                    "group reactions need the target author in user_id".into(),
                ))
            }
        };

        let mut params = json!({
            "emoji": req.emoji,
            "targetAuthor": author,
            "targetTimestamp": parse_timestamp("message_id", &req.message_id)?,
            "remove": req.remove,
        });
        address(&mut params, &req.to);
        if let Some(account) = &self.settings.account {
            params["account"] = json!(account);
        }

        self.call("sendReaction", params).await?;
        Ok(())
    }

    fn state(&self) -> RuntimeState {
        self.base.state()
    }

    fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.base.set_handler(handler);
    }
}

type Connected = (
    Arc<RpcBridge>,
    mpsc::UnboundedReceiver<RpcNotification>,
    Option<Value>,
);

/// Spawn the daemon and subscribe to incoming messages.
async fn connect(base: &BaseAdapter, settings: &RpcSettings) -> Result<Connected, RpcError> {
    let (bridge, notifications) = RpcBridge::spawn(base.id(), &settings.command, &settings.args)?;

    let mut params = json!({});
    if let Some(account) = &settings.account {
        params["account"] = json!(account);
    }
    match bridge
        .request("subscribeReceive", params, SUBSCRIBE_TIMEOUT)
        .await
    {
        Ok(subscription) => {
            info!(adapter = %base.id(), %subscription, "subscribed to incoming messages");
            Ok((bridge, notifications, Some(subscription)))
        }
        Err(e) => {
            bridge.shutdown().await;
            Err(e)
        }
    }
}

/// Unsubscribe (best effort), then shut the process down.
async fn release(adapter: &str, bridge: &RpcBridge, subscription: Option<Value>) {
    if let Some(subscription) = subscription {
        if let Err(e) = bridge
            .request(
                "unsubscribeReceive",
                json!({ "subscription": subscription }),
                UNSUBSCRIBE_TIMEOUT,
            )
            .await
        {
            debug!(adapter, error = %e, "unsubscribe failed, closing anyway");
        }
    }
    bridge.shutdown().await;
}

/// Forward notifications to the dispatcher, and respawn the daemon after
/// [`RECONNECT_DELAY`] whenever it exits on its own.
async fn supervise(
    base: Arc<BaseAdapter>,
    settings: RpcSettings,
    live: Arc<Live>,
    mut notifications: mpsc::UnboundedReceiver<RpcNotification>,
    events: mpsc::UnboundedSender<IncomingMessage>,
    cancel: CancellationToken,
) {
    loop {
        // Ends when stdout closes, i.e. the process is going away.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = notifications.recv() => match next {
                    Some(notification) => forward(&base, &settings, notification, &events),
                    None => break,
                },
            }
        }

        if let Some(bridge) = live.bridge() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = bridge.closed() => {}
            }
            let status = bridge
                .exit_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".into());
            base.record_error(format!("rpc process exited: {status}"));
            warn!(
                adapter = %base.id(),
                %status,
                delay_secs = RECONNECT_DELAY.as_secs(),
                "rpc process exited, respawning"
            );
        }
        live.take();

        loop {
            if !sleep_or_cancel(&cancel, RECONNECT_DELAY).await {
                return;
            }
            match connect(&base, &settings).await {
                Ok((bridge, rx, subscription)) => {
                    if cancel.is_cancelled() {
                        release(base.id(), &bridge, subscription).await;
                        return;
                    }
                    live.set(bridge, subscription);
                    notifications = rx;
                    break;
                }
                Err(e) => {
                    base.record_error(&e);
                    warn!(
                        adapter = %base.id(),
                        error = %e,
                        delay_secs = RECONNECT_DELAY.as_secs(),
                        "failed to respawn rpc process"
                    );
                }
            }
        }
    }
}

fn forward(
    base: &BaseAdapter,
    settings: &RpcSettings,
    notification: RpcNotification,
    events: &mpsc::UnboundedSender<IncomingMessage>,
) {
    if notification.method != "receive" {
        debug!(adapter = %base.id(), method = %notification.method, "ignoring notification");
        return;
    }
    match envelope::from_receive(
        base.channel_type(),
        &notification.params,
        settings.account.as_deref(),
    ) {
        Some(msg) => {
            let _ = events.send(msg);
        }
        None => debug!(adapter = %base.id(), "receive notification without a message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(options: &[(&str, &str)]) -> AdapterConfig {
        AdapterConfig {
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn default_args_target_the_account() {
        let settings = RpcSettings::from_config(&config(&[("account", "+15559999")]));
        assert_eq!(settings.command, "signal-cli");
        assert_eq!(
            settings.args,
            vec!["-a", "+15559999", "jsonRpc", "--receive-mode=manual"]
        );
    }

    #[test]
    fn explicit_args_replace_defaults() {
        let settings = RpcSettings::from_config(&config(&[
            ("command", "/opt/signal/bin/signal-cli"),
            ("args", "--config /var/lib/signal  jsonRpc"),
        ]));
        assert_eq!(settings.command, "/opt/signal/bin/signal-cli");
        assert_eq!(settings.args, vec!["--config", "/var/lib/signal", "jsonRpc"]);
        assert!(settings.account.is_none());
    }

    #[test]
    fn group_destinations_use_group_id() {
        let mut params = json!({});
        address(&mut params, &Destination::chat(ChannelType::Signal, "group:abc="));
        assert_eq!(params, json!({ "groupId": "abc=" }));

        let mut params = json!({});
        address(&mut params, &Destination::chat(ChannelType::Signal, "+1555"));
        assert_eq!(params, json!({ "recipient": ["+1555"] }));
    }

    #[tokio::test]
    async fn probe_without_binary_is_unhealthy() {
        let adapter = RpcAdapter::new("sig", "Signal", ChannelType::Signal, AdapterConfig::default())
            .with_command("courier-no-such-binary-42", vec![]);
        let probe = adapter.probe().await.unwrap();
        assert!(!probe.ok);
        assert!(!adapter.state().running);
    }
}

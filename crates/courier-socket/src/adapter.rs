use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_channels::{
    retry::{sleep_or_cancel, RECONNECT_DELAY},
    spawn_dispatcher, Adapter, AdapterConfig, BaseAdapter, Capabilities, ChannelError,
    ChannelType, ChatType, IncomingMessage, Lifecycle, MessageHandler, ProbeResult,
    ReactionRequest, RuntimeState, SendRequest, SendResult, TransportStyle,
};

use crate::rest::RestClient;
use crate::session::{self, Established, Identity};
use crate::transport::{Connector, WsConnector};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const DEFAULT_INTENTS: u64 = 1 | (1 << 9) | (1 << 10) | (1 << 12) | (1 << 15);

/// Endpoints and intent mask, read from the adapter's `options` table.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub gateway_url: String,
    pub api_base: String,
    pub intents: u64,
}

impl SocketSettings {
    pub fn from_config(adapter: &str, config: &AdapterConfig) -> Result<Self, ChannelError> {
        Ok(Self {
            gateway_url: config
                .option_or("gateway_url", DEFAULT_GATEWAY_URL)
                .to_string(),
            api_base: config.option_or("api_base", DEFAULT_API_BASE).to_string(),
            intents: config.option_u64(adapter, "intents", DEFAULT_INTENTS)?,
        })
    }
}

/// Persistent-socket adapter: a supervised gateway session for inbound
/// traffic and REST calls for everything outbound.
pub struct SocketAdapter {
    base: Arc<BaseAdapter>,
    config: AdapterConfig,
    settings: SocketSettings,
    connector: Arc<dyn Connector>,
    lifecycle: Lifecycle<RestClient>,
}

impl SocketAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        channel_type: ChannelType,
        config: AdapterConfig,
    ) -> Result<Self, ChannelError> {
        let id = id.into();
        let settings = SocketSettings::from_config(&id, &config)?;
        let capabilities = Capabilities::builder(TransportStyle::Socket)
            .chat_types(&[ChatType::Direct, ChatType::Group, ChatType::Thread])
            .reactions(true)
            .threads(true)
            .media(true)
            .build();

        Ok(Self {
            base: Arc::new(BaseAdapter::new(id, name, channel_type, capabilities)),
            connector: Arc::new(WsConnector::new(settings.gateway_url.clone())),
            config,
            settings,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Replace how gateway connections are opened.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn settings(&self) -> &SocketSettings {
        &self.settings
    }

    fn rest(&self, token: &str) -> Result<RestClient, ChannelError> {
        RestClient::new(&self.settings.api_base, token, self.config.proxy.as_deref())
    }

    fn running_rest(&self) -> Result<RestClient, ChannelError> {
        self.lifecycle
            .transport()
            .ok_or(ChannelError::NotRunning)
    }
}

#[async_trait]
impl Adapter for SocketAdapter {
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
            .start(&self.base, "websocket", |cancel| async move {
                let token = self.config.resolve_token(self.base.id())?;
                let rest = self.rest(&token)?;
                let identity = Identity {
                    adapter: self.base.id().to_string(),
                    channel_type: self.base.channel_type(),
                    token,
                    intents: self.settings.intents,
                };

                let established = session::open(self.connector.as_ref(), &identity, &cancel)
                    .await?
                    .ok_or_else(|| ChannelError::ConnectionFailed("start cancelled".into()))?;

                let (events, dispatcher) = spawn_dispatcher(Arc::clone(&self.base), cancel.clone());
                let supervisor = tokio::spawn(supervise(
                    Arc::clone(&self.base),
                    Arc::clone(&self.connector),
                    identity,
                    established,
                    events,
                    cancel,
                ));
                Ok((rest, vec![supervisor, dispatcher]))
            })
            .await
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.lifecycle.stop(&self.base, |_rest| async {}).await
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    async fn probe(&self) -> Result<ProbeResult, ChannelError> {
        let started = Instant::now();
        let token = match self.config.resolve_token(self.base.id()) {
            Ok(token) => token,
            Err(e) => return Ok(ProbeResult::unhealthy(0, e.to_string())),
        };

        let result = self.rest(&token)?.current_user().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(match result {
            Ok(user) => ProbeResult {
                bot_id: Some(user.id),
                bot_name: Some(user.username),
                ..ProbeResult::healthy(elapsed_ms)
            },
            Err(e) => ProbeResult::unhealthy(elapsed_ms, e.to_string()),
        })
    }

    async fn send(&self, req: &SendRequest) -> Result<SendResult, ChannelError> {
        let rest = self.running_rest()?;
        let channel = req.to.thread_id.as_deref().unwrap_or(&req.to.chat_id);

        let mut text = req.text.clone();
        for url in req.attachments.iter().filter_map(|a| a.url.as_deref()) {
            text.push('\n');
            text.push_str(url);
        }

        match rest
            .create_message(channel, &text, req.reply_to.as_deref())
            .await
        {
            Ok(id) => {
                self.base.record_outbound();
                debug!(adapter = %self.base.id(), channel, message_id = %id, "message sent");
                Ok(SendResult::ok(Some(id)))
            }
            Err(e) => {
                warn!(adapter = %self.base.id(), channel, error = %e, "send failed");
                Err(e)
            }
        }
    }

    async fn send_reaction(&self, req: &ReactionRequest) -> Result<(), ChannelError> {
        let rest = self.running_rest()?;
        let channel = req.to.thread_id.as_deref().unwrap_or(&req.to.chat_id);
        rest.react(channel, &req.message_id, &req.emoji, req.remove)
            .await?;
        self.base.record_outbound();
        Ok(())
    }

    fn state(&self) -> RuntimeState {
        self.base.state()
    }

    fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.base.set_handler(handler);
    }
}

/// Run the session `start` opened, then reconnect after [`RECONNECT_DELAY`]
/// whenever it drops, until cancelled.
async fn supervise(
    base: Arc<BaseAdapter>,
    connector: Arc<dyn Connector>,
    identity: Identity,
    first: Established,
    events: mpsc::UnboundedSender<IncomingMessage>,
    cancel: CancellationToken,
) {
    let mut next = Some(first);
    loop {
        let opened = match next.take() {
            Some(established) => Ok(Some(established)),
            None => session::open(connector.as_ref(), &identity, &cancel).await,
        };

        let result = match opened {
            Ok(None) => break,
            Ok(Some(established)) => {
                info!(adapter = %base.id(), "gateway connected");
                session::drive(established, &identity, &events, &cancel).await
            }
            Err(e) => Err(e),
        };

        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = result {
            base.record_error(&e);
            warn!(
                adapter = %base.id(),
                error = %e,
                delay_secs = RECONNECT_DELAY.as_secs(),
                "gateway session ended, reconnecting"
            );
        }
        if !sleep_or_cancel(&cancel, RECONNECT_DELAY).await {
            break;
        }
    }
    debug!(adapter = %base.id(), "gateway supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn settings_fall_back_to_defaults() {
        let settings = SocketSettings::from_config("dc", &AdapterConfig::default()).unwrap();
        assert_eq!(settings.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
        assert_eq!(settings.intents, 38401);
    }

    #[test]
    fn bad_intents_option_is_a_config_error() {
        let config = AdapterConfig {
            options: HashMap::from([("intents".to_string(), "lots".to_string())]),
            ..Default::default()
        };
        let err = SocketSettings::from_config("dc", &config).unwrap_err();
        assert!(matches!(err, ChannelError::ConfigError(_)));
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use courier_channels::{
    Adapter, AdapterConfig, BaseAdapter, Capabilities, ChannelError, ChannelType, ChatType,
    Lifecycle, MessageHandler, ProbeResult, ReactionRequest, RuntimeState, SendRequest,
    SendResult, TransportStyle,
};
use courier_core::config::POLL_WAIT_SECS;

use crate::bot_api::BotApiClient;
use crate::consumer::Consumer;
use crate::cursor::CursorStore;
use crate::source::PollSource;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub api_base: String,
    /// Server-side wait of each poll.
    pub wait: Duration,
}

impl PollSettings {
    pub fn from_config(adapter: &str, config: &AdapterConfig) -> Result<Self, ChannelError> {
        Ok(Self {
            api_base: config.option_or("api_base", DEFAULT_API_BASE).to_string(),
            wait: Duration::from_secs(config.option_u64(
                adapter,
                "poll_timeout_secs",
                POLL_WAIT_SECS,
            )?),
        })
    }
}

/// Long-poll adapter with a durable per-adapter cursor file.
pub struct PollingAdapter {
    base: Arc<BaseAdapter>,
    config: AdapterConfig,
    settings: PollSettings,
    cursor: CursorStore,
    /// Fixed source; when unset one is built from the token at start.
    source: Option<Arc<dyn PollSource>>,
    lifecycle: Lifecycle<Arc<dyn PollSource>>,
}

impl PollingAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        channel_type: ChannelType,
        config: AdapterConfig,
        state_dir: &Path,
    ) -> Result<Self, ChannelError> {
        let id = id.into();
        let settings = PollSettings::from_config(&id, &config)?;
        let capabilities = Capabilities::builder(TransportStyle::Polling)
            .chat_types(&[ChatType::Direct, ChatType::Group, ChatType::Channel])
            .reactions(true)
            .threads(true)
            .media(true)
            .native_commands(true)
            .build();

        Ok(Self {
            cursor: CursorStore::for_adapter(state_dir, &id),
            base: Arc::new(BaseAdapter::new(id, name, channel_type, capabilities)),
            config,
            settings,
            source: None,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Poll `source` instead of the Bot API.
    pub fn with_source(mut self, source: Arc<dyn PollSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    fn build_source(&self) -> Result<Arc<dyn PollSource>, ChannelError> {
        if let Some(source) = &self.source {
            return Ok(Arc::clone(source));
        }
        let token = self.config.resolve_token(self.base.id())?;
        Ok(Arc::new(BotApiClient::new(
            &self.settings.api_base,
            &token,
            self.config.proxy.as_deref(),
            self.base.channel_type(),
        )?))
    }

    fn running_source(&self) -> Result<Arc<dyn PollSource>, ChannelError> {
        self.lifecycle
            .transport()
            .ok_or(ChannelError::NotRunning)
    }
}

#[async_trait]
impl Adapter for PollingAdapter {
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
            .start(&self.base, "polling", |cancel| async move {
                let source = self.build_source()?;
                let me = source.get_me().await?;
                info!(adapter = %self.base.id(), bot_id = %me.id, bot_name = %me.name, "bot identity confirmed");

                let consumer = Consumer::new(
                    Arc::clone(&source),
                    self.cursor.clone(),
                    Arc::clone(&self.base),
                    self.settings.wait,
                );
                let task = tokio::spawn(consumer.run(cancel));
                Ok((source, vec![task]))
            })
            .await
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.lifecycle.stop(&self.base, |_source| async {}).await
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    async fn probe(&self) -> Result<ProbeResult, ChannelError> {
        let started = Instant::now();
        let source = match self.build_source() {
            Ok(source) => source,
            Err(e) => return Ok(ProbeResult::unhealthy(0, e.to_string())),
        };

        let result = source.get_me().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(match result {
            Ok(me) => ProbeResult {
                bot_id: Some(me.id),
                bot_name: Some(me.name),
                ..ProbeResult::healthy(elapsed_ms)
            },
            Err(e) => ProbeResult::unhealthy(elapsed_ms, e.to_string()),
        })
    }

    async fn send(&self, req: &SendRequest) -> Result<SendResult, ChannelError> {
        let source = self.running_source()?;

        let mut text = req.text.clone();
        for url in req.attachments.iter().filter_map(|a| a.url.as_deref()) {
            text.push('\n');
            text.push_str(url);
        }

        match source
            .send_text(
                &req.to.chat_id,
                &text,
                req.reply_to.as_deref(),
                req.to.thread_id.as_deref(),
            )
            .await
        {
            Ok(id) => {
                self.base.record_outbound();
                debug!(adapter = %self.base.id(), chat_id = %req.to.chat_id, message_id = %id, "message sent");
                Ok(SendResult::ok(Some(id)))
            }
            Err(e) => {
                warn!(adapter = %self.base.id(), chat_id = %req.to.chat_id, error = %e, "send failed");
                Err(e.into())
            }
        }
    }

    async fn send_reaction(&self, req: &ReactionRequest) -> Result<(), ChannelError> {
        let source = self.running_source()?;
        let emoji = (!req.remove).then_some(req.emoji.as_str());
        source
            .set_reaction(&req.to.chat_id, &req.message_id, emoji)
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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use courier_channels::{
    Adapter, AdapterConfig, BaseAdapter, Capabilities, ChannelError, ChannelType, ChatType,
    Lifecycle, MessageHandler, ProbeResult, ReactionRequest, RuntimeState, SendRequest,
    SendResult, TransportStyle,
};
use courier_core::config::REPLY_URL_TTL_SECS;

use crate::crypto::WxCrypto;
use crate::reply_cache::ReplyUrlCache;
use crate::routes;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Verified credentials plus the token that bounds detached dispatches.
pub(crate) struct Keys {
    pub token: String,
    pub crypto: WxCrypto,
    pub cancel: CancellationToken,
}

pub(crate) struct Inner {
    pub base: BaseAdapter,
    pub config: AdapterConfig,
    pub http: reqwest::Client,
    pub replies: ReplyUrlCache,
    pub lifecycle: Lifecycle<Arc<Keys>>,
}

impl Inner {
    fn keys(&self, cancel: CancellationToken) -> Result<Keys, ChannelError> {
        let token = self.config.resolve_token(self.base.id())?;
        let aes_key = self.config.option("encoding_aes_key").ok_or_else(|| {
            ChannelError::ConfigError(format!(
                "adapter {}: options.encoding_aes_key is required",
                self.base.id()
            ))
        })?;
        let crypto = WxCrypto::new(aes_key)?;
        Ok(Keys {
            token,
            crypto,
            cancel,
        })
    }
}

/// Platform reply to a robot push: `{"errcode": 0, "errmsg": "ok"}`.
#[derive(Debug, Deserialize)]
struct PushReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Signed/encrypted webhook adapter.
///
/// Inbound traffic arrives through [`router`](WebhookAdapter::router), which
/// the host mounts on its HTTP server. Replies go to the one-time reply URL
/// cached for the recipient, else to the configured group-robot `webhook_url`.
pub struct WebhookAdapter {
    inner: Arc<Inner>,
}

impl WebhookAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        channel_type: ChannelType,
        config: AdapterConfig,
    ) -> Result<Self, ChannelError> {
        let id = id.into();
        let ttl = config.option_u64(&id, "reply_url_ttl_secs", REPLY_URL_TTL_SECS)?;

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ChannelError::ConfigError(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| ChannelError::ConfigError(format!("http client: {e}")))?;

        let capabilities = Capabilities::builder(TransportStyle::Webhook)
            .chat_types(&[ChatType::Direct, ChatType::Group])
            .build();

        Ok(Self {
            inner: Arc::new(Inner {
                base: BaseAdapter::new(id, name, channel_type, capabilities),
                config,
                http,
                replies: ReplyUrlCache::new(Duration::from_secs(ttl)),
                lifecycle: Lifecycle::new(),
            }),
        })
    }

    /// Callback routes for this instance, to be nested under a per-adapter path.
    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.inner))
    }

    pub fn reply_urls(&self) -> &ReplyUrlCache {
        &self.inner.replies
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<SendResult, ChannelError> {
        let resp = self
            .inner
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!("HTTP {status}: {text}")));
        }

        let reply: PushReply = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("bad response: {e}")))?;
        if reply.errcode != 0 {
            warn!(
                adapter = %self.inner.base.id(),
                errcode = reply.errcode,
                errmsg = %reply.errmsg,
                "platform rejected message"
            );
            return Ok(SendResult::failed(format!(
                "errcode {}: {}",
                reply.errcode, reply.errmsg
            )));
        }

        self.inner.base.record_outbound();
        Ok(SendResult::ok(None))
    }
}

#[async_trait]
impl Adapter for WebhookAdapter {
    fn id(&self) -> &str {
        self.inner.base.id()
    }

    fn name(&self) -> &str {
        self.inner.base.name()
    }

    fn channel_type(&self) -> ChannelType {
        self.inner.base.channel_type()
    }

    fn capabilities(&self) -> &Capabilities {
        self.inner.base.capabilities()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let inner = &self.inner;
        inner
            .lifecycle
            .start(&inner.base, "webhook", |cancel| async move {
                Ok((Arc::new(inner.keys(cancel)?), Vec::new()))
            })
            .await
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.inner
            .lifecycle
            .stop(&self.inner.base, |_keys| async {})
            .await
    }

    fn is_running(&self) -> bool {
        self.inner.base.is_running()
    }

    /// Local check only: the token resolves and the AES key decodes.
    async fn probe(&self) -> Result<ProbeResult, ChannelError> {
        Ok(match self.inner.keys(CancellationToken::new()) {
            Ok(_) => ProbeResult::healthy(0),
            Err(e) => ProbeResult::unhealthy(0, e.to_string()),
        })
    }

    async fn send(&self, req: &SendRequest) -> Result<SendResult, ChannelError> {
        if !self.is_running() {
            return Err(ChannelError::NotRunning);
        }

        let recipient = req.to.user_id.as_deref().unwrap_or(&req.to.chat_id);
        if let Some(url) = self.inner.replies.get(recipient) {
            debug!(adapter = %self.id(), recipient, "replying through cached reply URL");
            let body = json!({ "msgtype": "markdown", "markdown": { "content": req.text } });
            let result = self.post(&url, body).await;
            if matches!(&result, Ok(sent) if sent.success) {
                self.inner.replies.consume(recipient, &url);
            }
            return result;
        }

        let Some(webhook_url) = self.inner.config.webhook_url.as_deref() else {
            return Err(ChannelError::SendFailed(format!(
                "no reply URL cached for {recipient} and no webhook_url configured"
            )));
        };
        debug!(adapter = %self.id(), recipient, "pushing through group robot webhook");
        let body = json!({ "msgtype": "text", "text": { "content": req.text } });
        self.post(webhook_url, body).await
    }

    async fn send_reaction(&self, _req: &ReactionRequest) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported(
            "webhook transport has no reactions".into(),
        ))
    }

    fn state(&self) -> RuntimeState {
        self.inner.base.state()
    }

    fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.base.set_handler(handler);
    }
}

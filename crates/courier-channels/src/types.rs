use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Platform family an adapter speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Discord,
    Qq,
    Wecom,
    Feishu,
    Dingtalk,
    Telegram,
    Slack,
    Line,
    Signal,
    Imessage,
    Whatsapp,
    Webchat,
}

impl ChannelType {
    pub const ALL: [ChannelType; 12] = [
        ChannelType::Discord,
        ChannelType::Qq,
        ChannelType::Wecom,
        ChannelType::Feishu,
        ChannelType::Dingtalk,
        ChannelType::Telegram,
        ChannelType::Slack,
        ChannelType::Line,
        ChannelType::Signal,
        ChannelType::Imessage,
        ChannelType::Whatsapp,
        ChannelType::Webchat,
    ];

    /// Stable lowercase identifier, identical to the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Discord => "discord",
            ChannelType::Qq => "qq",
            ChannelType::Wecom => "wecom",
            ChannelType::Feishu => "feishu",
            ChannelType::Dingtalk => "dingtalk",
            ChannelType::Telegram => "telegram",
            ChannelType::Slack => "slack",
            ChannelType::Line => "line",
            ChannelType::Signal => "signal",
            ChannelType::Imessage => "imessage",
            ChannelType::Whatsapp => "whatsapp",
            ChannelType::Webchat => "webchat",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ChannelType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ChannelError::ConfigError(format!("unknown channel type: {s}")))
    }
}

/// Conversation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
    Channel,
    Thread,
}

/// Payload kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
    Reaction,
    System,
}

/// How inbound traffic reaches the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStyle {
    /// The platform pushes HTTP requests to us.
    Webhook,
    /// We pull with a cursor.
    Polling,
    /// A long-lived connection (socket or subprocess pipes).
    Socket,
}

/// What an adapter supports. Set once at construction, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    chat_types: Vec<ChatType>,
    reactions: bool,
    threads: bool,
    media: bool,
    voice: bool,
    native_commands: bool,
    transport: TransportStyle,
}

impl Capabilities {
    pub fn builder(transport: TransportStyle) -> CapabilitiesBuilder {
        CapabilitiesBuilder {
            caps: Capabilities {
                chat_types: vec![ChatType::Direct],
                reactions: false,
                threads: false,
                media: false,
                voice: false,
                native_commands: false,
                transport,
            },
        }
    }

    pub fn chat_types(&self) -> &[ChatType] {
        &self.chat_types
    }
    pub fn supports_chat(&self, chat: ChatType) -> bool {
        self.chat_types.contains(&chat)
    }
    pub fn reactions(&self) -> bool {
        self.reactions
    }
    pub fn threads(&self) -> bool {
        self.threads
    }
    pub fn media(&self) -> bool {
        self.media
    }
    pub fn voice(&self) -> bool {
        self.voice
    }
    pub fn native_commands(&self) -> bool {
        self.native_commands
    }
    pub fn transport(&self) -> TransportStyle {
        self.transport
    }
    pub fn is_webhook(&self) -> bool {
        self.transport == TransportStyle::Webhook
    }
    pub fn is_polling(&self) -> bool {
        self.transport == TransportStyle::Polling
    }
}

/// Consuming builder; `build()` is the only way to obtain [`Capabilities`].
pub struct CapabilitiesBuilder {
    caps: Capabilities,
}

impl CapabilitiesBuilder {
    pub fn chat_types(mut self, types: &[ChatType]) -> Self {
        self.caps.chat_types = types.to_vec();
        self
    }
    pub fn reactions(mut self, on: bool) -> Self {
        self.caps.reactions = on;
        self
    }
    pub fn threads(mut self, on: bool) -> Self {
        self.caps.threads = on;
        self
    }
    pub fn media(mut self, on: bool) -> Self {
        self.caps.media = on;
        self
    }
    pub fn voice(mut self, on: bool) -> Self {
        self.caps.voice = on;
        self
    }
    pub fn native_commands(mut self, on: bool) -> Self {
        self.caps.native_commands = on;
        self
    }
    pub fn build(self) -> Capabilities {
        self.caps
    }
}

/// Live status of one adapter.
///
/// Mutated only by the owning adapter under its private lock; everyone else
/// receives copies through [`Adapter::state`](crate::Adapter::state).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RuntimeState {
    pub running: bool,
    /// Descriptive transport mode: "websocket", "webhook", "polling", "rpc".
    pub mode: String,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_stop_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub message_count: i64,
}

/// A file or media reference carried by a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Unified inbound envelope. Immutable once built by a transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_type: ChannelType,
    pub chat_id: String,
    pub chat_type: ChatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// Routing key used by the registry and by adapters to address a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    pub channel_type: ChannelType,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Destination {
    pub fn chat(channel_type: ChannelType, chat_id: impl Into<String>) -> Self {
        Self {
            channel_type,
            chat_id: chat_id.into(),
            thread_id: None,
            user_id: None,
        }
    }

    /// Where a reply to `msg` should go: same chat, same thread, addressed to its sender.
    pub fn reply_to(msg: &IncomingMessage) -> Self {
        Self {
            channel_type: msg.channel_type,
            chat_id: msg.chat_id.clone(),
            thread_id: msg.thread_id.clone(),
            user_id: Some(msg.sender_id.clone()),
        }
    }
}

/// Unified outbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: Destination,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl SendRequest {
    pub fn text(to: Destination, text: impl Into<String>) -> Self {
        Self {
            to,
            text: text.into(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }
}

/// Outcome of a send. Either `message_id` or `error` is meaningful, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Add or remove an emoji reaction on an existing message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub to: Destination,
    pub message_id: String,
    pub emoji: String,
    #[serde(default)]
    pub remove: bool,
}

/// Result of a cheap reachability / credential check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProbeResult {
    pub ok: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn healthy(elapsed_ms: u64) -> Self {
        Self {
            ok: true,
            elapsed_ms,
            ..Default::default()
        }
    }

    pub fn unhealthy(elapsed_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            elapsed_ms,
            detail: Some(detail.into()),
            ..Default::default()
        }
    }
}

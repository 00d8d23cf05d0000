//! Bot-API shaped HTTP source: `getUpdates`, `sendMessage`,
//! `setMessageReaction` and `getMe` against `{api_base}/bot{token}/`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use courier_channels::{
    Attachment, ChannelError, ChannelType, ChatType, IncomingMessage, MessageType,
};

use crate::error::PollError;
use crate::source::{BotIdentity, PollItem, PollSource};

/// Keeps the socket open while the server holds a long poll.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    message_thread_id: Option<i64>,
    from: Option<User>,
    chat: Chat,
    date: i64,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
    document: Option<Document>,
    reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct BotApiClient {
    http: Client,
    base_url: String,
    channel_type: ChannelType,
}

impl BotApiClient {
    pub fn new(
        api_base: &str,
        token: &str,
        proxy: Option<&str>,
        channel_type: ChannelType,
    ) -> Result<Self, ChannelError> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ChannelError::ConfigError(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| ChannelError::ConfigError(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
            channel_type,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<T, PollError> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(params)
            .timeout(timeout)
            .send()
            .await?;

        // Error replies carry the same envelope with a non-2xx status.
        let body: ApiResponse<T> = resp.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(PollError::Api {
                description: body
                    .description
                    .unwrap_or_else(|| format!("{method} returned no result")),
            }),
        }
    }

    fn normalize(&self, msg: Message) -> Option<IncomingMessage> {
        let from = msg.from?;
        if from.is_bot {
            return None;
        }

        let chat_type = match msg.chat.kind.as_str() {
            "private" => ChatType::Direct,
            "channel" => ChatType::Channel,
            _ => ChatType::Group,
        };

        let mut attachments = Vec::new();
        // The last size is the largest.
        if let Some(photo) = msg.photo.last() {
            attachments.push(Attachment {
                kind: MessageType::Image,
                url: Some(photo.file_id.clone()),
                file_name: None,
                mime_type: None,
            });
        }
        if let Some(doc) = msg.document {
            attachments.push(Attachment {
                kind: MessageType::File,
                url: Some(doc.file_id),
                file_name: doc.file_name,
                mime_type: doc.mime_type,
            });
        }

        let text = msg.text.or(msg.caption).unwrap_or_default();
        if text.is_empty() && attachments.is_empty() {
            return None;
        }

        Some(IncomingMessage {
            id: msg.message_id.to_string(),
            channel_type: self.channel_type,
            chat_id: msg.chat.id.to_string(),
            chat_type,
            thread_id: msg.message_thread_id.map(|t| t.to_string()),
            sender_id: from.id.to_string(),
            sender_name: Some(from.username.unwrap_or(from.first_name)),
            text,
            attachments,
            timestamp: msg.date,
            reply_to: msg.reply_to_message.map(|r| r.message_id.to_string()),
        })
    }
}

fn parse_id(field: &'static str, value: &str) -> Result<i64, PollError> {
    value.parse().map_err(|_| PollError::InvalidId {
        field,
        value: value.to_string(),
    })
}

#[async_trait]
impl PollSource for BotApiClient {
    async fn poll(&self, cursor: i64, wait: Duration) -> Result<Vec<PollItem>, PollError> {
        let params = json!({
            "offset": cursor,
            "timeout": wait.as_secs(),
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self
            .call("getUpdates", &params, wait + POLL_TIMEOUT_MARGIN)
            .await?;
        debug!(cursor, count = updates.len(), "getUpdates returned");

        Ok(updates
            .into_iter()
            .map(|u| PollItem {
                seq: u.update_id,
                message: u.message.and_then(|m| self.normalize(m)),
            })
            .collect())
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
        thread_id: Option<&str>,
    ) -> Result<String, PollError> {
        let mut params = json!({ "chat_id": chat_id, "text": text });
        if let Some(reply) = reply_to {
            params["reply_parameters"] = json!({
                "message_id": parse_id("reply_to", reply)?,
                "allow_sending_without_reply": true,
            });
        }
        if let Some(thread) = thread_id {
            params["message_thread_id"] = json!(parse_id("thread_id", thread)?);
        }

        let sent: SentMessage = self.call("sendMessage", &params, REQUEST_TIMEOUT).await?;
        Ok(sent.message_id.to_string())
    }

    async fn set_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: Option<&str>,
    ) -> Result<(), PollError> {
        let reaction = match emoji {
            Some(emoji) => json!([{ "type": "emoji", "emoji": emoji }]),
            None => json!([]),
        };
        let params = json!({
            "chat_id": chat_id,
            "message_id": parse_id("message_id", message_id)?,
            "reaction": reaction,
        });
        let _: bool = self
            .call("setMessageReaction", &params, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn get_me(&self) -> Result<BotIdentity, PollError> {
        let me: User = self.call("getMe", &json!({}), REQUEST_TIMEOUT).await?;
        Ok(BotIdentity {
            id: me.id.to_string(),
            name: me.username.unwrap_or(me.first_name),
        })
    }
}

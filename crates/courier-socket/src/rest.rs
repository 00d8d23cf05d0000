//! REST side of the socket platform: outbound messages, reactions, identity.

use std::time::Duration;

use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::json;

use courier_channels::ChannelError;

/// Platform limit is 2000 characters; leave headroom.
pub const CHUNK_MAX: usize = 1950;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// The bot account behind a token.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: String,
    pub username: String,
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    api_base: String,
    token: String,
}

impl RestClient {
    pub fn new(api_base: &str, token: &str, proxy: Option<&str>) -> Result<Self, ChannelError> {
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
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Post `text` to `channel_id` in chunks and return the first message id.
    ///
    /// Only the first chunk carries the reply reference.
    pub async fn create_message(
        &self,
        channel_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String, ChannelError> {
        let url = self.url(&["channels", channel_id, "messages"])?;
        let mut first_id = None;

        for (i, chunk) in split_chunks(text).into_iter().enumerate() {
            let mut body = json!({ "content": chunk });
            if let (0, Some(reply)) = (i, reply_to) {
                body["message_reference"] = json!({ "message_id": reply });
            }

            let resp = self
                .request(Method::POST, url.clone())
                .json(&body)
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            let created: Created = check(resp)
                .await?
                .json()
                .await
                .map_err(|e| ChannelError::SendFailed(format!("bad response: {e}")))?;
            first_id.get_or_insert(created.id);
        }

        first_id.ok_or_else(|| ChannelError::SendFailed("empty message".into()))
    }

    /// Add (or with `remove`, delete) the bot's own reaction.
    pub async fn react(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
        remove: bool,
    ) -> Result<(), ChannelError> {
        let url = self.url(&[
            "channels", channel_id, "messages", message_id, "reactions", emoji, "@me",
        ])?;
        let method = if remove { Method::DELETE } else { Method::PUT };
        let resp = self
            .request(method, url)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        check(resp).await?;
        Ok(())
    }

    pub async fn current_user(&self) -> Result<BotUser, ChannelError> {
        let url = self.url(&["users", "@me"])?;
        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token))
    }

    /// Append percent-encoded path segments to the API base.
    fn url(&self, segments: &[&str]) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ChannelError::ConfigError(format!("invalid api_base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ChannelError::ConfigError("api_base cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ChannelError::AuthFailed(body));
    }
    Err(ChannelError::SendFailed(format!("HTTP {status}: {body}")))
}

/// Split `text` into chunks of at most [`CHUNK_MAX`] bytes, preferring
/// newline then space boundaries and never cutting inside a character.
pub fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > CHUNK_MAX {
        let mut limit = CHUNK_MAX;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

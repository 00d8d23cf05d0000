use chrono::DateTime;
use serde::Deserialize;

use courier_channels::{Attachment, ChannelType, ChatType, IncomingMessage, MessageType};

/// The subset of a `MESSAGE_CREATE` payload the unified envelope needs.
#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: Author,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    #[serde(default)]
    message_reference: Option<MessageReference>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    url: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageReference {
    #[serde(default)]
    message_id: Option<String>,
}

/// Map a `MESSAGE_CREATE` payload to an [`IncomingMessage`].
///
/// Returns `None` for payloads that do not decode, for messages written by
/// other bots, and for the bot's own messages.
pub fn from_message_create(
    channel_type: ChannelType,
    d: &serde_json::Value,
    bot_id: Option<&str>,
) -> Option<IncomingMessage> {
    let raw: MessageCreate = serde_json::from_value(d.clone()).ok()?;
    if raw.author.bot || bot_id == Some(raw.author.id.as_str()) {
        return None;
    }

    let chat_type = if raw.guild_id.is_some() {
        ChatType::Group
    } else {
        ChatType::Direct
    };
    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    let attachments = raw
        .attachments
        .into_iter()
        .map(|a| Attachment {
            kind: kind_for(a.content_type.as_deref()),
            url: Some(a.url),
            file_name: a.filename,
            mime_type: a.content_type,
        })
        .collect();

    Some(IncomingMessage {
        id: raw.id,
        channel_type,
        chat_id: raw.channel_id,
        chat_type,
        thread_id: None,
        sender_id: raw.author.id,
        sender_name: raw.author.global_name.or(raw.author.username),
        text: raw.content,
        attachments,
        timestamp,
        reply_to: raw.message_reference.and_then(|r| r.message_id),
    })
}

fn kind_for(mime: Option<&str>) -> MessageType {
    match mime.and_then(|m| m.split('/').next()) {
        Some("image") => MessageType::Image,
        Some("audio") => MessageType::Audio,
        Some("video") => MessageType::Video,
        _ => MessageType::File,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "id": "m1",
            "channel_id": "c1",
            "guild_id": "g1",
            "author": { "id": "u1", "username": "alice", "global_name": "Alice" },
            "content": "hello",
            "timestamp": "2024-05-01T12:00:00.000000+00:00",
            "attachments": [
                { "url": "https://cdn/x.png", "filename": "x.png", "content_type": "image/png" }
            ],
            "message_reference": { "message_id": "m0" }
        })
    }

    #[test]
    fn guild_message_maps_to_group() {
        let msg = from_message_create(ChannelType::Discord, &payload(), Some("bot")).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.chat_id, "c1");
        assert_eq!(msg.chat_type, ChatType::Group);
        assert_eq!(msg.sender_name.as_deref(), Some("Alice"));
        assert_eq!(msg.timestamp, 1_714_564_800);
        assert_eq!(msg.reply_to.as_deref(), Some("m0"));
        assert_eq!(msg.attachments[0].kind, MessageType::Image);
    }

    #[test]
    fn own_and_bot_messages_are_skipped() {
        assert!(from_message_create(ChannelType::Discord, &payload(), Some("u1")).is_none());

        let mut from_bot = payload();
        from_bot["author"]["bot"] = json!(true);
        assert!(from_message_create(ChannelType::Discord, &from_bot, None).is_none());
    }

    #[test]
    fn malformed_payload_is_none() {
        let bad = json!({ "id": 5 });
        assert!(from_message_create(ChannelType::Discord, &bad, None).is_none());
    }
}

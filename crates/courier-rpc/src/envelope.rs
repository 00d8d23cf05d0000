//! `receive` notification payloads from a signal-cli style daemon.

use serde::Deserialize;
use serde_json::Value;

use courier_channels::{Attachment, ChannelType, ChatType, IncomingMessage, MessageType};

/// Prefix that marks a group conversation in `chat_id`.
pub const GROUP_PREFIX: &str = "group:";

#[derive(Debug, Deserialize)]
struct ReceiveParams {
    envelope: Envelope,
    account: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    source: Option<String>,
    source_number: Option<String>,
    source_uuid: Option<String>,
    source_name: Option<String>,
    timestamp: i64,
    data_message: Option<DataMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMessage {
    timestamp: Option<i64>,
    message: Option<String>,
    group_info: Option<GroupInfo>,
    quote: Option<Quote>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfo {
    group_id: String,
}

#[derive(Debug, Deserialize)]
struct Quote {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttachment {
    id: Option<String>,
    content_type: Option<String>,
    filename: Option<String>,
}

fn kind_for_mime(mime: Option<&str>) -> MessageType {
    match mime.and_then(|m| m.split('/').next()) {
        Some("image") => MessageType::Image,
        Some("audio") => MessageType::Audio,
        Some("video") => MessageType::Video,
        _ => MessageType::File,
    }
}

/// Build the unified message from a `receive` notification.
///
/// Returns `None` for receipts, typing indicators, sync copies of our own
/// messages and anything without text or attachments. The message id is the
/// sender's millisecond timestamp, which is what quotes and reactions target.
pub fn from_receive(
    channel_type: ChannelType,
    params: &Value,
    account: Option<&str>,
) -> Option<IncomingMessage> {
    let params = ReceiveParams::deserialize(params).ok()?;
    let envelope = params.envelope;
    let data = envelope.data_message?;

    let sender = envelope
        .source_number
        .or(envelope.source)
        .or(envelope.source_uuid)?;
    let own = account.or(params.account.as_deref());
    if own == Some(sender.as_str()) {
        return None;
    }

    let attachments: Vec<Attachment> = data
        .attachments
        .into_iter()
        .map(|a| Attachment {
            kind: kind_for_mime(a.content_type.as_deref()),
            url: a.id,
            file_name: a.filename,
            mime_type: a.content_type,
        })
        .collect();
    let text = data.message.unwrap_or_default();
    if text.is_empty() && attachments.is_empty() {
        return None;
    }

    let (chat_id, chat_type) = match data.group_info {
        Some(group) => (format!("{GROUP_PREFIX}{}", group.group_id), ChatType::Group),
        None => (sender.clone(), ChatType::Direct),
    };
    let sent_at = data.timestamp.unwrap_or(envelope.timestamp);

    Some(IncomingMessage {
        id: sent_at.to_string(),
        channel_type,
        chat_id,
        chat_type,
        thread_id: None,
        sender_id: sender,
        sender_name: envelope.source_name.filter(|n| !n.is_empty()),
        text,
        attachments,
        timestamp: sent_at / 1000,
        reply_to: data.quote.map(|q| q.id.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn receive(data_message: Value) -> Value {
        json!({
            "envelope": {
                "source": "+15550001",
                "sourceNumber": "+15550001",
                "sourceUuid": "8f0c-uuid",
                "sourceName": "Ann",
                "timestamp": 1_700_000_000_123_i64,
                "dataMessage": data_message,
            },
            "account": "+15559999",
            "subscription": 0
        })
    }

    #[test]
    fn direct_text_message() {
        let msg = from_receive(
            ChannelType::Signal,
            &receive(json!({ "timestamp": 1_700_000_000_123_i64, "message": "hi" })),
            None,
        )
        .unwrap();

        assert_eq!(msg.id, "1700000000123");
        assert_eq!(msg.chat_id, "+15550001");
        assert_eq!(msg.chat_type, ChatType::Direct);
        assert_eq!(msg.sender_name.as_deref(), Some("Ann"));
        assert_eq!(msg.timestamp, 1_700_000_000);
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn group_message_with_quote_and_attachment() {
        let msg = from_receive(
            ChannelType::Signal,
            &receive(json!({
                "message": "",
                "groupInfo": { "groupId": "aGVsbG8=", "type": "DELIVER" },
                "quote": { "id": 1_699_999_999_000_i64, "author": "+15559999" },
                "attachments": [{ "id": "att1", "contentType": "image/jpeg", "filename": "a.jpg" }]
            })),
            None,
        )
        .unwrap();

        assert_eq!(msg.chat_id, "group:aGVsbG8=");
        assert_eq!(msg.chat_type, ChatType::Group);
        assert_eq!(msg.reply_to.as_deref(), Some("1699999999000"));
        assert_eq!(msg.attachments[0].kind, MessageType::Image);
        assert_eq!(msg.attachments[0].url.as_deref(), Some("att1"));
    }

    #[test]
    fn receipts_and_own_messages_are_skipped() {
        let receipt = json!({
            "envelope": {
                "source": "+15550001",
                "timestamp": 1,
                "receiptMessage": { "isDelivery": true }
            }
        });
        assert!(from_receive(ChannelType::Signal, &receipt, None).is_none());

        let own = receive(json!({ "message": "echo" }));
        assert!(from_receive(ChannelType::Signal, &own, Some("+15550001")).is_none());
    }
}

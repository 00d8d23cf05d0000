use std::collections::HashMap;

use serde::Deserialize;
use xml::reader::{EventReader, XmlEvent};

use courier_channels::{Attachment, ChannelType, ChatType, IncomingMessage, MessageType};

use crate::error::PayloadError;

/// Result of parsing one decrypted callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// `None` for events and unsupported message types (acknowledged, not dispatched).
    pub message: Option<IncomingMessage>,
    pub sender_id: Option<String>,
    /// One-time reply URL carried by bot callbacks.
    pub response_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Xml,
}

fn sniff(body: &[u8]) -> Result<Format, PayloadError> {
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => Ok(Format::Json),
        Some(b'<') => Ok(Format::Xml),
        _ => Err(PayloadError::UnknownFormat),
    }
}

/// Pull the base64 ciphertext out of the outer request body.
///
/// JSON bodies carry `{"encrypt": "..."}`; XML bodies `<xml><Encrypt>...</Encrypt></xml>`.
pub fn extract_encrypt(body: &[u8]) -> Result<String, PayloadError> {
    match sniff(body)? {
        Format::Json => {
            let value: serde_json::Value = serde_json::from_slice(body)?;
            value
                .get("encrypt")
                .or_else(|| value.get("Encrypt"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or(PayloadError::MissingField("encrypt"))
        }
        Format::Xml => xml_fields(body)?
            .remove("Encrypt")
            .ok_or(PayloadError::MissingField("Encrypt")),
    }
}

/// Parse the decrypted inner payload (JSON or XML, by first non-blank byte).
pub fn parse_inner(channel_type: ChannelType, payload: &[u8]) -> Result<Inbound, PayloadError> {
    match sniff(payload)? {
        Format::Json => parse_json(channel_type, payload),
        Format::Xml => parse_xml(channel_type, payload),
    }
}

#[derive(Debug, Deserialize)]
struct BotCallback {
    #[serde(default)]
    msgid: Option<String>,
    #[serde(default)]
    chatid: Option<String>,
    #[serde(default)]
    chattype: Option<String>,
    #[serde(default)]
    from: Option<BotSender>,
    #[serde(default)]
    msgtype: String,
    #[serde(default)]
    text: Option<Content>,
    #[serde(default)]
    image: Option<Image>,
    #[serde(default)]
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotSender {
    userid: String,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

fn parse_json(channel_type: ChannelType, payload: &[u8]) -> Result<Inbound, PayloadError> {
    let cb: BotCallback = serde_json::from_slice(payload)?;
    let sender_id = cb.from.map(|f| f.userid);

    let (text, attachments) = match cb.msgtype.as_str() {
        "text" => (cb.text.map(|t| t.content).unwrap_or_default(), Vec::new()),
        "image" => match cb.image {
            Some(image) => (String::new(), vec![image_attachment(image.url)]),
            None => return Ok(ignored(sender_id, cb.response_url)),
        },
        _ => return Ok(ignored(sender_id, cb.response_url)),
    };

    let sender = sender_id
        .clone()
        .ok_or(PayloadError::MissingField("from.userid"))?;
    let chat_type = match cb.chattype.as_deref() {
        Some("group") => ChatType::Group,
        _ => ChatType::Direct,
    };

    let message = IncomingMessage {
        id: cb
            .msgid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        channel_type,
        chat_id: cb.chatid.unwrap_or_else(|| sender.clone()),
        chat_type,
        thread_id: None,
        sender_id: sender,
        sender_name: None,
        text,
        attachments,
        timestamp: chrono::Utc::now().timestamp(),
        reply_to: None,
    };

    Ok(Inbound {
        message: Some(message),
        sender_id,
        response_url: cb.response_url,
    })
}

fn parse_xml(channel_type: ChannelType, payload: &[u8]) -> Result<Inbound, PayloadError> {
    let mut fields = xml_fields(payload)?;
    let sender = fields.remove("FromUserName");

    let msg_type = fields.remove("MsgType").unwrap_or_default();

    let (text, attachments) = match msg_type.as_str() {
        "text" => (fields.remove("Content").unwrap_or_default(), Vec::new()),
        "image" => match fields.remove("PicUrl") {
            Some(url) => (String::new(), vec![image_attachment(url)]),
            None => return Ok(ignored(sender, None)),
        },
        _ => return Ok(ignored(sender, None)),
    };

    let sender_id = sender.ok_or(PayloadError::MissingField("FromUserName"))?;
    let chat_id = fields.remove("ChatId");
    let chat_type = if chat_id.is_some() {
        ChatType::Group
    } else {
        ChatType::Direct
    };
    let timestamp = fields
        .get("CreateTime")
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    let message = IncomingMessage {
        id: fields
            .remove("MsgId")
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        channel_type,
        chat_id: chat_id.unwrap_or_else(|| sender_id.clone()),
        chat_type,
        thread_id: None,
        sender_id: sender_id.clone(),
        sender_name: None,
        text,
        attachments,
        timestamp,
        reply_to: None,
    };

    Ok(Inbound {
        message: Some(message),
        sender_id: Some(sender_id),
        response_url: None,
    })
}

fn ignored(sender_id: Option<String>, response_url: Option<String>) -> Inbound {
    Inbound {
        message: None,
        sender_id,
        response_url,
    }
}

fn image_attachment(url: String) -> Attachment {
    Attachment {
        kind: MessageType::Image,
        url: Some(url),
        file_name: None,
        mime_type: None,
    }
}

/// Text content of every direct child of the root element.
fn xml_fields(body: &[u8]) -> Result<HashMap<String, String>, PayloadError> {
    let mut fields = HashMap::new();
    let mut depth = 0usize;
    let mut current: Option<String> = None;
    let mut text = String::new();

    for event in EventReader::new(body) {
        match event.map_err(|e| PayloadError::Xml(e.to_string()))? {
            XmlEvent::StartElement { name, .. } => {
                depth += 1;
                if depth == 2 {
                    current = Some(name.local_name);
                    text.clear();
                }
            }
            XmlEvent::Characters(s) | XmlEvent::CData(s) if depth == 2 => text.push_str(&s),
            XmlEvent::EndElement { .. } => {
                if depth == 2 {
                    if let Some(name) = current.take() {
                        fields.insert(name, std::mem::take(&mut text));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }
    Ok(fields)
}

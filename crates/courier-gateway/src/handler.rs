use async_trait::async_trait;
use tracing::info;

use courier_channels::{IncomingMessage, MessageHandler};

/// Stand-in for the agent layer: logs every inbound message.
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle_incoming(&self, msg: &IncomingMessage) -> anyhow::Result<()> {
        info!(
            channel = %msg.channel_type,
            chat_id = %msg.chat_id,
            sender = %msg.sender_id,
            msg_id = %msg.id,
            chars = msg.text.chars().count(),
            attachments = msg.attachments.len(),
            "inbound message"
        );
        Ok(())
    }
}

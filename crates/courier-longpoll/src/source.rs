use std::time::Duration;

use async_trait::async_trait;

use courier_channels::IncomingMessage;

use crate::error::PollError;

/// One item returned by a poll.
#[derive(Debug, Clone)]
pub struct PollItem {
    /// Server-assigned, increasing sequence number (the next cursor is `seq + 1`).
    pub seq: i64,
    /// `None` for updates that carry nothing to dispatch; the cursor still advances.
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
}

/// The remote side of a long-poll adapter.
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Items with sequence `>= cursor`, waiting up to `wait` server-side.
    async fn poll(&self, cursor: i64, wait: Duration) -> Result<Vec<PollItem>, PollError>;

    /// Returns the id of the created message.
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
        thread_id: Option<&str>,
    ) -> Result<String, PollError>;

    /// Set the bot's reaction on a message; `None` clears it.
    async fn set_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: Option<&str>,
    ) -> Result<(), PollError>;

    async fn get_me(&self) -> Result<BotIdentity, PollError>;
}

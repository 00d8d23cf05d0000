//! A durable long-poll consumer.
//!
//! The cursor (`last sequence + 1`) is written to disk as each item is taken,
//! before the item is dispatched. A crash therefore re-delivers at most the
//! in-flight poll and may drop the item being dispatched: at-most-once.

pub mod adapter;
pub mod bot_api;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod source;

pub use adapter::{PollSettings, PollingAdapter};
pub use bot_api::BotApiClient;
pub use consumer::Consumer;
pub use cursor::CursorStore;
pub use error::PollError;
pub use source::{BotIdentity, PollItem, PollSource};

//! A signed and encrypted push webhook.
//!
//! Requests are verified (`sha1` over the sorted token/timestamp/nonce/
//! ciphertext), decrypted (AES-CBC, IV taken from the key), unwrapped from
//! the length-prefixed envelope and parsed from JSON or XML. The HTTP ack
//! never waits for the handler.

pub mod adapter;
pub mod crypto;
pub mod error;
pub mod payload;
pub mod reply_cache;
pub mod routes;

pub use adapter::WebhookAdapter;
pub use crypto::{signature, verify_signature, Envelope, WxCrypto};
pub use error::{CryptoError, PayloadError};
pub use reply_cache::ReplyUrlCache;

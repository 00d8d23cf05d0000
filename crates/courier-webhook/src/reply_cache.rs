use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    url: String,
    expires_at: Instant,
}

/// One-time reply URLs keyed by sender id, owned by a single adapter.
///
/// A URL is dropped once a reply through it succeeds. Expired entries are dropped when looked
/// up, and every insert sweeps the rest so the map cannot grow unbounded.
#[derive(Debug)]
pub struct ReplyUrlCache {
    ttl: Duration,
    entries: DashMap<String, Entry>,
}

impl ReplyUrlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Remember the latest reply URL for `sender`, replacing any older one.
    pub fn insert(&self, sender: impl Into<String>, url: impl Into<String>) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
        self.entries.insert(
            sender.into(),
            Entry {
                url: url.into(),
                expires_at: now + self.ttl,
            },
        );
    }

    /// The URL for `sender` if it has not expired. An expired entry is dropped.
    pub fn get(&self, sender: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(sender) {
            if entry.expires_at > now {
                return Some(entry.url.clone());
            }
        }
        self.entries.remove_if(sender, |_, e| e.expires_at <= now);
        None
    }

    /// Drop `url` for `sender` once a reply through it has been delivered.
    ///
    /// A newer URL that arrived meanwhile is kept.
    pub fn consume(&self, sender: &str, url: &str) {
        self.entries.remove_if(sender, |_, e| e.url == url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

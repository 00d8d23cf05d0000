use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::PollError;

/// One adapter's long-poll position, stored as a plain decimal integer.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{state_dir}/{adapter_id}.cursor`
    pub fn for_adapter(state_dir: impl AsRef<Path>, adapter_id: &str) -> Self {
        Self::new(state_dir.as_ref().join(format!("{adapter_id}.cursor")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored cursor. A missing file is 0; an unreadable one is logged and 0.
    pub async fn load(&self) -> i64 {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(path = %self.path.display(), content = %raw.trim(), "unparsable cursor file, starting from 0");
                0
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read cursor file, starting from 0");
                0
            }
        }
    }

    /// Overwrite the stored cursor (write to a sibling temp file, then rename).
    pub async fn store(&self, cursor: i64) -> Result<(), PollError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("cursor.tmp");
        tokio::fs::write(&tmp, cursor.to_string()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::for_adapter(dir.path(), "tg");
        assert_eq!(store.load().await, 0);
        assert!(store.path().ends_with("tg.cursor"));
    }

    #[tokio::test]
    async fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::for_adapter(dir.path().join("nested"), "tg");
        store.store(42).await.unwrap();
        assert_eq!(store.load().await, 42);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "42");
        store.store(43).await.unwrap();
        assert_eq!(store.load().await, 43);
    }

    #[tokio::test]
    async fn garbage_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::for_adapter(dir.path(), "tg");
        std::fs::write(store.path(), "not-a-number").unwrap();
        assert_eq!(store.load().await, 0);
    }
}

//! Conversation persistence.
//!
//! One JSON-lines file per session under the data directory: every stored
//! message is a single newline-terminated JSON object appended to the
//! session's file.  Session keys are caller-supplied and untrusted, so they
//! are sanitized before ever touching a file name; the raw key is kept
//! inside each record.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::provider::Role;

/// Errors that can occur during conversation I/O.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to create data directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open session file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write session file: {0}")]
    Write(std::io::Error),

    #[error("failed to read session file: {0}")]
    Read(std::io::Error),

    #[error("failed to delete session file: {0}")]
    Delete(std::io::Error),

    #[error("failed to list sessions: {0}")]
    List(std::io::Error),
}

/// One persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub session_key: String,
    pub role: Role,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub page_context: serde_json::Value,
}

impl StoredMessage {
    pub fn new(session_key: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            page_context: serde_json::Value::Null,
        }
    }

    pub fn with_page_context(mut self, page_context: serde_json::Value) -> Self {
        self.page_context = page_context;
        self
    }
}

/// Append-only JSON-lines conversation store.
pub struct MessageStore {
    root: PathBuf,
}

impl MessageStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(StorageError::CreateDir)?;
        Ok(Self { root })
    }

    fn session_file(&self, session_key: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", sanitize_key(session_key)))
    }

    /// Append one message to its session's file.
    pub async fn append(&self, message: &StoredMessage) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_file(&message.session_key))
            .await
            .map_err(StorageError::OpenFile)?;

        file.write_all(&line).await.map_err(StorageError::Write)?;
        file.flush().await.map_err(StorageError::Write)?;
        Ok(())
    }

    /// Return the last `limit` messages of a session, oldest first.
    pub async fn history(
        &self,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let path = self.session_file(session_key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Read(err)),
        };

        let mut messages: Vec<StoredMessage> = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    // A torn write must not poison the whole conversation.
                    warn!(path = %path.display(), %err, "skipping malformed stored message");
                }
            }
        }

        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    /// Delete a session's stored conversation.  Deleting an unknown session
    /// is not an error.
    pub async fn delete_session(&self, session_key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.session_file(session_key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Delete(err)),
        }
    }

    /// List the raw session keys with stored conversations.
    ///
    /// File names are sanitized, so the raw key is recovered from the first
    /// record of each file; unreadable files fall back to the file stem.
    pub async fn sessions(&self) -> Result<Vec<String>, StorageError> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(StorageError::List)?;

        while let Some(entry) = entries.next_entry().await.map_err(StorageError::List)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            sessions.push(session_key_of(&path).await);
        }

        sessions.sort();
        Ok(sessions)
    }
}

async fn session_key_of(path: &Path) -> String {
    if let Ok(contents) = tokio::fs::read_to_string(path).await {
        if let Some(first) = contents.lines().find(|l| !l.trim().is_empty()) {
            if let Ok(message) = serde_json::from_str::<StoredMessage>(first) {
                return message.session_key;
            }
        }
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Turn an untrusted session key into a safe file stem.
///
/// Alphanumerics, `-`, and `_` pass through; everything else becomes `_`.
/// Keys that were altered or truncated get a hash suffix so distinct keys
/// cannot collide on the same file.
fn sanitize_key(key: &str) -> String {
    let filtered: String = key
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if filtered == key {
        return filtered;
    }

    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{filtered}-{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (MessageStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn append_and_history_round_trip() {
        let (store, _dir) = store().await;

        store
            .append(&StoredMessage::new("s1", Role::User, "hello"))
            .await
            .unwrap();
        store
            .append(&StoredMessage::new("s1", Role::Assistant, "hi, how can I help?"))
            .await
            .unwrap();

        let history = store.history("s1", 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn history_returns_only_the_tail() {
        let (store, _dir) = store().await;

        for i in 0..10 {
            store
                .append(&StoredMessage::new("s1", Role::User, format!("msg {i}")))
                .await
                .unwrap();
        }

        let history = store.history("s1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "msg 7");
        assert_eq!(history[2].content, "msg 9");
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let (store, _dir) = store().await;
        assert!(store.history("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_session_removes_messages_and_is_idempotent() {
        let (store, _dir) = store().await;

        store
            .append(&StoredMessage::new("s1", Role::User, "hello"))
            .await
            .unwrap();
        store.delete_session("s1").await.unwrap();
        assert!(store.history("s1", 10).await.unwrap().is_empty());

        // Deleting again must not error.
        store.delete_session("s1").await.unwrap();
    }

    #[tokio::test]
    async fn sessions_recovers_raw_keys() {
        let (store, _dir) = store().await;

        store
            .append(&StoredMessage::new("visitor/1", Role::User, "a"))
            .await
            .unwrap();
        store
            .append(&StoredMessage::new("plain", Role::User, "b"))
            .await
            .unwrap();

        let sessions = store.sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains(&"visitor/1".to_string()));
        assert!(sessions.contains(&"plain".to_string()));
    }

    #[tokio::test]
    async fn hostile_keys_cannot_escape_the_data_dir() {
        let (store, dir) = store().await;

        store
            .append(&StoredMessage::new("../../etc/passwd", Role::User, "x"))
            .await
            .unwrap();

        // The file must land inside the store root.
        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        let entry = entries.next().unwrap().unwrap();
        assert!(entry.path().starts_with(dir.path()));
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn distinct_hostile_keys_do_not_collide() {
        let (store, _dir) = store().await;

        store
            .append(&StoredMessage::new("a/b", Role::User, "first"))
            .await
            .unwrap();
        store
            .append(&StoredMessage::new("a?b", Role::User, "second"))
            .await
            .unwrap();

        assert_eq!(store.history("a/b", 10).await.unwrap().len(), 1);
        assert_eq!(store.history("a?b", 10).await.unwrap().len(), 1);
    }

    #[test]
    fn sanitize_passes_clean_keys_through() {
        assert_eq!(sanitize_key("session-123_abc"), "session-123_abc");
    }

    #[test]
    fn sanitize_hashes_altered_keys() {
        let sanitized = sanitize_key("a/b");
        assert!(sanitized.starts_with("a_b-"));
        assert_ne!(sanitize_key("a/b"), sanitize_key("a?b"));
    }
}

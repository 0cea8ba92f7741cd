//! In-memory directory store

use super::{DirectoryEntry, DirectoryError, DirectoryStore, RowEdit};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Directory rows held in local memory.
///
/// Edits are applied under one write lock, which gives the same
/// all-or-nothing behaviour as a database transaction.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectoryStore {
    entries: Arc<RwLock<HashMap<String, DirectoryEntry>>>,
    sessions: Arc<RwLock<HashMap<String, u64>>>,
}

impl MemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accounting start for a username
    pub async fn open_session(&self, username: &str) {
        *self
            .sessions
            .write()
            .await
            .entry(username.to_string())
            .or_insert(0) += 1;
    }

    /// Record an accounting stop for a username
    pub async fn close_session(&self, username: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(count) = sessions.get_mut(username) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                sessions.remove(username);
            }
        }
    }

    /// Number of usernames with at least one row
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn entry(&self, username: &str) -> Result<DirectoryEntry, DirectoryError> {
        Ok(self
            .entries
            .read()
            .await
            .get(username)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, username: &str, edit: &RowEdit) -> Result<(), DirectoryError> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(username.to_string()).or_default();
        entry.apply(edit);
        if entry.is_empty() {
            entries.remove(username);
        }
        Ok(())
    }

    async fn purge(&self, username: &str) -> Result<u64, DirectoryError> {
        let removed = self.entries.write().await.remove(username);
        Ok(removed
            .map(|entry| (entry.check.len() + entry.reply.len()) as u64)
            .unwrap_or(0))
    }

    async fn open_sessions(&self, username: &str) -> Result<u64, DirectoryError> {
        Ok(self.sessions.read().await.get(username).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryRow, CLEARTEXT_PASSWORD};

    #[tokio::test]
    async fn test_apply_and_purge() {
        let store = MemoryDirectoryStore::new();
        let edit = RowEdit {
            put_check: vec![DirectoryRow::set(CLEARTEXT_PASSWORD, "secret")],
            ..RowEdit::default()
        };
        store.apply("alice", &edit).await.unwrap();
        assert_eq!(store.len().await, 1);

        assert_eq!(store.purge("alice").await.unwrap(), 1);
        assert_eq!(store.purge("alice").await.unwrap(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_edit_leaves_no_entry() {
        let store = MemoryDirectoryStore::new();
        store.apply("nobody", &RowEdit::default()).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_counting() {
        let store = MemoryDirectoryStore::new();
        store.open_session("alice").await;
        store.open_session("alice").await;
        store.close_session("alice").await;
        assert_eq!(store.open_sessions("alice").await.unwrap(), 1);
        store.close_session("alice").await;
        store.close_session("alice").await;
        assert_eq!(store.open_sessions("alice").await.unwrap(), 0);
    }
}

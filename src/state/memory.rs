//! In-memory state backend.
//!
//! Used for previews that must not touch disk and by tests that want to
//! inspect every snapshot the engine writes.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, StateError, StrataError};

use super::lock::{LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::Checkpoint;

/// State store that keeps the checkpoint in process memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    /// Current checkpoint.
    checkpoint: Mutex<Option<Checkpoint>>,
    /// Current lock.
    lock: Mutex<Option<LockInfo>>,
    /// Number of successful saves.
    saves: AtomicUsize,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with a checkpoint.
    #[must_use]
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: Mutex::new(Some(checkpoint)),
            ..Self::default()
        }
    }

    /// Number of times the checkpoint has been saved.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn poisoned() -> StrataError {
        StrataError::internal("memory state store mutex poisoned")
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let guard = self.checkpoint.lock().map_err(|_| Self::poisoned())?;
        Ok(guard.clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut guard = self.checkpoint.lock().map_err(|_| Self::poisoned())?;
        *guard = Some(checkpoint.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.checkpoint.lock().map_err(|_| Self::poisoned())? = None;
        *self.lock.lock().map_err(|_| Self::poisoned())? = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self
            .checkpoint
            .lock()
            .map_err(|_| Self::poisoned())?
            .is_some())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut guard = self.lock.lock().map_err(|_| Self::poisoned())?;
        if let Some(existing) = guard.as_ref()
            && !existing.is_expired()
        {
            return Err(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }
            .into());
        }

        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let info = LockInfo::new(&holder, "memory");
        *guard = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut guard = self.lock.lock().map_err(|_| Self::poisoned())?;
        if guard.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *guard = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().map_err(|_| Self::poisoned())?.clone())
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .lock
            .lock()
            .map_err(|_| Self::poisoned())?
            .as_ref()
            .is_some_and(|l| !l.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_and_count() {
        let store = MemoryStateStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(&Checkpoint::new("dev", "test")).await.unwrap();
        store.save(&Checkpoint::new("dev", "test")).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().await.unwrap().unwrap().stack, "dev");

        store.delete().await.unwrap();
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_exclusive() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("a").await.unwrap();
        assert!(store.acquire_lock("b").await.is_err());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
        assert!(store.acquire_lock("b").await.is_ok());
    }
}

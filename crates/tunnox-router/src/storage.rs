//! Generic TTL key/value storage. A single implementation ([`InMemoryKvStore`])
//! ships here; a production deployment would swap in a Redis-backed one
//! behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,

    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), KvError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;
    async fn delete(&self, key: &str) -> Result<(), KvError>;
    async fn exists(&self, key: &str) -> bool;
    async fn close(&self);
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// In-process TTL store. Expired entries are both rejected on `get` and
/// reclaimed by a periodic background sweep so a quiet key doesn't sit
/// in memory forever.
pub struct InMemoryKvStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        tokio::spawn(sweep_loop(entries.clone()));
        Self { entries }
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn sweep_loop(entries: Arc<DashMap<String, Entry>>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "swept expired kv entries");
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.value.clone()),
            Some(_) => Err(KvError::NotFound),
            None => Err(KvError::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key).map(|_| ()).ok_or(KvError::NotFound)
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_ok()
    }

    async fn close(&self) {
        self.entries.clear();
    }
}

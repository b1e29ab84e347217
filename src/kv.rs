//! Durable key-value store contract.
//!
//! Single-key atomic put with optional TTL. The pipeline never needs
//! compare-and-swap: every key has one writer by construction (partition
//! routing for counters, the Status stage for statuses).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;

/// Key-value store failures
#[derive(Debug, Error)]
#[error("kv store error: {message}")]
pub struct KvError {
    pub message: String,
}

impl KvError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Durable key-value store with atomic put and optional TTL
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key; `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Write a key
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), KvError>;

    /// Write a key that expires after `ttl`
    async fn put_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), KvError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process store backing tests and single-node embeddings
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if let Some(expires_at) = entry.expires_at {
            if Utc::now() > expires_at {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(entry.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), KvError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| KvError::new(format!("ttl out of range: {e}")))?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryKvStore::new();
        store
            .put_with_ttl("k", b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryKvStore::new();
        store.put("k", b"1".to_vec()).await.unwrap();
        store.put("k", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"2".to_vec()));
    }
}

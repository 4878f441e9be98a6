//! In-memory queue and store for testing.
//!
//! Both record every call and can be switched into a failing mode, which
//! makes routing and sequencing observable without a broker or S3:
//!
//! ```
//! use bigears::memory::{MemoryQueue, MemoryStore};
//! use bigears::Publisher;
//!
//! # #[tokio::main] async fn main() {
//! let queue = MemoryQueue::new();
//! let store = MemoryStore::new();
//! let publisher = Publisher::with_handles("eu-west-1", "orders", queue.clone(), store.clone());
//!
//! let id = publisher.publish(&serde_json::json!({"a": 1})).await.unwrap();
//! assert_eq!(queue.sent()[0].attributes.get("UUID"), Some(id.as_str()));
//! assert_eq!(store.put_count(), 0);
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::envelope::MessageAttributes;
use crate::queue::Queue;
use crate::store::Store;

/// A message accepted by [`MemoryQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub body: String,
    pub attributes: MessageAttributes,
}

/// Queue that keeps every sent message in memory.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of send attempts, failed ones included.
    pub fn send_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages accepted so far, in acceptance order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send_message(&self, body: String, attributes: MessageAttributes) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory queue rejected message");
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage { body, attributes });
        Ok(())
    }
}

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Bucket that keeps objects in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    puts: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of write attempts, failed ones included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory store rejected {key}");
        }
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Location;

    #[tokio::test]
    async fn test_memory_queue_counts_failed_sends() {
        let queue = MemoryQueue::new();
        let attributes = MessageAttributes::new("1", Location::Inline, "b", "r");

        queue.send_message("{}".into(), attributes.clone()).await.unwrap();
        queue.set_failing(true);
        assert!(queue.send_message("{}".into(), attributes).await.is_err());

        assert_eq!(queue.send_count(), 2);
        assert_eq!(queue.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_put_and_delete() {
        let store = MemoryStore::new();
        store
            .put_object("k", b"[]".to_vec(), "application/json")
            .await
            .unwrap();
        assert_eq!(store.get("k").unwrap().content_type, "application/json");

        store.delete_object("k").await.unwrap();
        assert!(store.get("k").is_none());
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.delete_count(), 1);
    }
}

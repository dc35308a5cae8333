//! Driver-local view of each instance's lifecycle state
//!
//! The cache is the driver's own belief about an instance, refreshed at
//! every lifecycle transition and by live status queries. It is shared by
//! every operation, so implementations must be safe to use concurrently.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::InstanceState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub state: InstanceState,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(state: InstanceState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait StateCache: Send + Sync {
    async fn get(&self, id: &str) -> Option<CacheEntry>;

    /// Overwrite the entry for `id`
    async fn set(&self, id: &str, state: InstanceState);

    async fn delete(&self, id: &str);

    /// Seed `id` with `state` unless an entry already exists
    ///
    /// Returns true when the entry was inserted.
    async fn seed(&self, id: &str, state: InstanceState) -> bool {
        if self.get(id).await.is_some() {
            return false;
        }
        self.set(id, state).await;
        true
    }
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct InMemoryStateCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn get(&self, id: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(id).cloned()
    }

    async fn set(&self, id: &str, state: InstanceState) {
        self.entries
            .write()
            .await
            .insert(id.to_string(), CacheEntry::new(state));
    }

    async fn delete(&self, id: &str) {
        self.entries.write().await.remove(id);
    }

    async fn seed(&self, id: &str, state: InstanceState) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.to_string(), CacheEntry::new(state));
        true
    }
}

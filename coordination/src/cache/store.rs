//! In-memory TTL store for session artifacts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::debug;

use super::entry::{ArtifactPatch, CacheEntry};
use crate::session::SessionKey;

/// One hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

pub type SharedArtifactCache = Arc<SessionArtifactCache>;

#[derive(Debug)]
pub struct SessionArtifactCache {
    entries: RwLock<HashMap<SessionKey, CacheEntry>>,
    default_ttl: Duration,
}

impl Default for SessionArtifactCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SessionArtifactCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn shared(self) -> SharedArtifactCache {
        Arc::new(self)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Live entry for `key`. An expired entry is evicted and reads as absent.
    pub async fn get(&self, key: &SessionKey) -> Option<CacheEntry> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock: a writer may have replaced it.
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
            debug!(session = %key, "evicted expired artifact entry");
            return None;
        }
        entries.get(key).cloned()
    }

    /// Merge `patch` into the entry for `key`, creating it if absent.
    ///
    /// `ttl` only applies when a new entry is created. Returns the entry as
    /// stored after the merge.
    pub async fn put_or_merge(
        &self,
        key: &SessionKey,
        patch: ArtifactPatch,
        ttl: Option<Duration>,
    ) -> CacheEntry {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
        }
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), ttl.unwrap_or(self.default_ttl)));
        let stored = entry.merge(patch);
        if !stored.is_empty() {
            debug!(session = %key, stages = ?stored, "stored artifacts");
        }
        entry.clone()
    }

    /// Drop everything cached for `key`. Returns whether an entry existed.
    pub async fn clear(&self, key: &SessionKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Evict every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

//! The `ResultCache` contract and its in-memory implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::entry::{CacheEntry, ErrorMarker, Fingerprint};

/// Key-value store for task results and error markers. Last-writer-wins on
/// every operation; no multi-key guarantee is required or provided.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Read the result entry, treating entries older than `retention` as
    /// absent. Readers pass the task type's retention window.
    async fn get(&self, fp: &Fingerprint, retention: Duration) -> Option<CacheEntry>;

    /// Replace the whole entry.
    async fn put(&self, fp: &Fingerprint, entry: CacheEntry);

    async fn get_error(&self, fp: &Fingerprint) -> Option<ErrorMarker>;

    async fn put_error(&self, fp: &Fingerprint, marker: ErrorMarker);

    async fn clear_error(&self, fp: &Fingerprint);

    async fn delete(&self, fp: &Fingerprint);
}

/// In-process cache backed by hash maps. Expiry is purely logical: `get`
/// filters by age, and stale entries are evicted lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    errors: Mutex<HashMap<Fingerprint, ErrorMarker>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, fp: &Fingerprint, retention: Duration) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().await;
        match entries.get(fp) {
            Some(entry) if entry.age() < retention => Some(entry.clone()),
            Some(_) => {
                // Past the retention window — logically absent
                entries.remove(fp);
                None
            }
            None => None,
        }
    }

    async fn put(&self, fp: &Fingerprint, entry: CacheEntry) {
        self.entries.lock().await.insert(fp.clone(), entry);
    }

    async fn get_error(&self, fp: &Fingerprint) -> Option<ErrorMarker> {
        self.errors.lock().await.get(fp).cloned()
    }

    async fn put_error(&self, fp: &Fingerprint, marker: ErrorMarker) {
        self.errors.lock().await.insert(fp.clone(), marker);
    }

    async fn clear_error(&self, fp: &Fingerprint) {
        self.errors.lock().await.remove(fp);
    }

    async fn delete(&self, fp: &Fingerprint) {
        self.entries.lock().await.remove(fp);
        tracing::debug!("🧹 cache entry deleted: {fp}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fp(args: &str) -> Fingerprint {
        Fingerprint::new("list_machines", "org-1", &serde_json::json!({ "cloud_id": args }))
    }

    #[tokio::test]
    async fn test_get_after_put_returns_payload() {
        let cache = MemoryCache::new();
        let key = fp("c1");
        cache
            .put(&key, CacheEntry::new(serde_json::json!({"machines": []}), "seq-1"))
            .await;

        let entry = cache.get(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(entry.payload, serde_json::json!({"machines": []}));
        assert_eq!(entry.seq_id, "seq-1");
    }

    #[tokio::test]
    async fn test_put_replaces_whole_entry() {
        let cache = MemoryCache::new();
        let key = fp("c1");
        cache
            .put(&key, CacheEntry::new(serde_json::json!({"v": 1}), "seq-1"))
            .await;
        cache
            .put(&key, CacheEntry::new(serde_json::json!({"v": 2}), "seq-2"))
            .await;

        let entry = cache.get(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(entry.payload["v"], 2);
        assert_eq!(entry.seq_id, "seq-2");
    }

    #[tokio::test]
    async fn test_logical_expiry() {
        let cache = MemoryCache::new();
        let key = fp("c1");
        let mut entry = CacheEntry::new(serde_json::json!({"v": 1}), "seq-1");
        entry.timestamp = Utc::now() - chrono::Duration::hours(25);
        cache.put(&key, entry).await;

        // 24h retention: entry is past the window, reads see it as absent
        assert!(cache.get(&key, Duration::from_secs(24 * 3600)).await.is_none());
    }

    #[tokio::test]
    async fn test_error_marker_lifecycle() {
        let cache = MemoryCache::new();
        let key = fp("c1");
        assert!(cache.get_error(&key).await.is_none());

        let mut marker = ErrorMarker::new("seq-1");
        marker.timestamps.push(Utc::now());
        cache.put_error(&key, marker).await;
        assert_eq!(cache.get_error(&key).await.unwrap().timestamps.len(), 1);

        cache.clear_error(&key).await;
        assert!(cache.get_error(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCache::new();
        let key = fp("c1");
        cache
            .put(&key, CacheEntry::new(serde_json::json!(1), "seq-1"))
            .await;
        cache.delete(&key).await;
        assert!(cache.get(&key, Duration::from_secs(60)).await.is_none());
    }
}

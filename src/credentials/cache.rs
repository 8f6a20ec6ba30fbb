//! In-process validation cache for the Credential Service: a
//! process-scoped singleton with explicit `init`/`shutdown`. Keyed by
//! `key_hash` so a cache hit still requires the caller to have hashed a
//! real secret; entries expire after `credential_ttl_ms` (kept short,
//! under a minute) and are explicitly invalidated on rotation, status
//! change, or soft-delete via a version token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::db::credentials::DbCredential;

struct CachedEntry {
    credential: DbCredential,
    inserted_at: Instant,
    version: u64,
}

/// TTL + version-token cache. `version` increments on every invalidation
/// so that a concurrent reader holding a stale `CachedEntry` reference
/// (cloned out before eviction) is still distinguishable from a fresh one
/// if ever compared, even though the common path just re-reads the map.
pub struct CredentialCache {
    by_hash: DashMap<String, CachedEntry>,
    /// `key_hash` of the most recent successful insert for a given
    /// credential id, so rotation/status changes can evict the right
    /// cache row without knowing the secret.
    id_to_hash: DashMap<uuid::Uuid, String>,
    ttl: Duration,
    version: AtomicU64,
}

impl CredentialCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            by_hash: DashMap::new(),
            id_to_hash: DashMap::new(),
            ttl: Duration::from_millis(ttl_ms),
            version: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key_hash: &str) -> Option<DbCredential> {
        let entry = self.by_hash.get(key_hash)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.by_hash.remove(key_hash);
            return None;
        }
        Some(entry.credential.clone())
    }

    pub fn put(&self, key_hash: String, credential: DbCredential) {
        self.id_to_hash.insert(credential.id, key_hash.clone());
        self.by_hash.insert(
            key_hash,
            CachedEntry {
                credential,
                inserted_at: Instant::now(),
                version: self.version.load(Ordering::Relaxed),
            },
        );
    }

    /// Evict any cached row for `credential_id` (rotation, status change,
    /// soft-delete). Bumps the version counter regardless of whether a
    /// row was present, since callers invalidate speculatively.
    pub fn invalidate(&self, credential_id: uuid::Uuid) {
        self.version.fetch_add(1, Ordering::Relaxed);
        if let Some((_, hash)) = self.id_to_hash.remove(&credential_id) {
            self.by_hash.remove(&hash);
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn clear(&self) {
        self.by_hash.clear();
        self.id_to_hash.clear();
    }

    /// Sweeps expired entries proactively (spec §4.4 cache reconciliation),
    /// rather than waiting for a `get` to land on them. A row that's never
    /// looked up again would otherwise sit in the map until the process
    /// restarts. Returns the number of entries evicted.
    pub fn reconcile(&self) -> usize {
        let stale: Vec<String> = self
            .by_hash
            .iter()
            .filter(|entry| entry.inserted_at.elapsed() > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for hash in stale {
            if let Some((_, entry)) = self.by_hash.remove(&hash) {
                self.id_to_hash.remove(&entry.credential.id);
                evicted += 1;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn sample(id: Uuid) -> DbCredential {
        DbCredential {
            id,
            key_prefix: "viva_aaaaaaaa".into(),
            key_hash: "hash".into(),
            name: "test".into(),
            description: None,
            owner_email: "owner@example.com".into(),
            owner_name: None,
            tier: "free".into(),
            status: "active".into(),
            rate_limit: 60,
            rate_window_secs: 3600,
            quota_limit: None,
            total_usage: 0,
            tags: vec![],
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn hit_then_invalidate_clears_it() {
        let cache = CredentialCache::new(60_000);
        let id = Uuid::new_v4();
        cache.put("hash".to_string(), sample(id));
        assert!(cache.get("hash").is_some());

        cache.invalidate(id);
        assert!(cache.get("hash").is_none());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = CredentialCache::new(0);
        let id = Uuid::new_v4();
        cache.put("hash".to_string(), sample(id));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("hash").is_none());
    }

    #[test]
    fn reconcile_evicts_stale_entries_without_a_get() {
        let cache = CredentialCache::new(0);
        let id = Uuid::new_v4();
        cache.put("hash".to_string(), sample(id));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.reconcile(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn reconcile_leaves_fresh_entries_alone() {
        let cache = CredentialCache::new(60_000);
        let id = Uuid::new_v4();
        cache.put("hash".to_string(), sample(id));

        assert_eq!(cache.reconcile(), 0);
        assert_eq!(cache.len(), 1);
    }
}

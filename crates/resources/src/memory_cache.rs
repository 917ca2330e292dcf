//! In-process cache

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{Cache, ContractError, TtlItem};
use moka::Expiry;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    ttl: Option<Duration>,
}

/// Per-entry expiry: the item's own TTL, else the cache default, else never
struct EntryExpiry {
    default_ttl: Option<Duration>,
}

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        entry.ttl.or(self.default_ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl.or(self.default_ttl)
    }
}

/// Cache backed by `moka`, with optional per-key expiry
///
/// Expired entries are evicted by the cache's own housekeeping, so keys that
/// are written once and never read again do not accumulate.
#[derive(Clone)]
pub struct MemoryCache {
    entries: moka::future::Cache<String, Entry>,
    default_ttl: Option<Duration>,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.entries.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new(default_ttl: Option<Duration>) -> Self {
        let entries = moka::future::Cache::builder()
            .expire_after(EntryExpiry { default_ttl })
            .build();
        Self {
            entries,
            default_ttl,
        }
    }

    /// Number of live entries, after evicting expired ones
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Whether the cache holds no live entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ContractError> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    #[instrument(name = "memory_cache_set", skip(self, value), fields(key = %key))]
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), ContractError> {
        self.entries.insert(key.to_string(), Entry { value, ttl }).await;
        Ok(())
    }

    #[instrument(name = "memory_cache_set_multi", skip(self, items), fields(count = items.len()))]
    async fn set_multi(&self, items: HashMap<String, TtlItem>) -> Result<(), ContractError> {
        for (key, item) in items {
            let entry = Entry {
                value: item.value,
                ttl: item.ttl,
            };
            self.entries.insert(key, entry).await;
        }
        debug!(total = self.entries.entry_count(), "Memory cache updated");
        Ok(())
    }
}

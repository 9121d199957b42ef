//! In-process memory tier.
//!
//! The hot end of a chain: a concurrent map with an optional per-entry TTL.
//! With a TTL it also serves as the stock negative cache, where the bounded
//! entry lifetime caps how long a stale "known missing" mark can survive.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::Tier;
use crate::error::TierError;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// A [`DashMap`]-backed tier. Values are cloned in and out.
///
/// Eviction beyond the optional TTL is deliberately not implemented here;
/// bounded-size caching belongs to the warm tiers.
pub struct MemoryTier<K, V> {
    data: DashMap<K, Entry<V>>,
    ttl: Option<Duration>,
}

impl<K, V> MemoryTier<K, V>
where
    K: Eq + std::hash::Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            ttl: None,
        }
    }

    /// A tier whose entries expire `ttl` after insertion. Expired entries
    /// read as absent and are dropped lazily.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            data: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    /// Current entry count, including not-yet-collected expired entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    fn expired(&self, entry: &Entry<V>) -> bool {
        match self.ttl {
            Some(ttl) => entry.stored_at.elapsed() >= ttl,
            None => false,
        }
    }

    // Reads a live value; drops the entry instead if its TTL has passed.
    fn live(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        match self.data.get(key) {
            None => return None,
            Some(entry) => {
                if !self.expired(entry.value()) {
                    return Some(entry.value().value.clone());
                }
            }
        }
        // the read guard is released above; removing under it would deadlock
        self.data.remove(key);
        None
    }
}

impl<K, V> Default for MemoryTier<K, V>
where
    K: Eq + std::hash::Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Tier<K, V> for MemoryTier<K, V>
where
    K: Clone + Eq + std::hash::Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        "memory"
    }

    async fn contains(&self, key: &K) -> Result<bool, TierError> {
        Ok(self.live(key).is_some())
    }

    async fn get(&self, key: &K) -> Result<Option<V>, TierError> {
        Ok(self.live(key))
    }

    async fn get_batch(
        &self,
        keys: &[K],
        found: &mut HashMap<K, V>,
    ) -> Result<Vec<K>, TierError> {
        let mut missing = Vec::new();
        for key in keys {
            match self.live(key) {
                Some(value) => {
                    found.insert(key.clone(), value);
                }
                None => missing.push(key.clone()),
            }
        }
        Ok(missing)
    }

    async fn put(&self, key: &K, value: &V) -> Result<(), TierError> {
        self.data.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), TierError> {
        self.data.remove(key);
        Ok(())
    }
}

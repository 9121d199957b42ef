// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Negative-result ("missing") cache.
//!
//! After a full chain walk confirms a key is absent, the chain records the
//! miss so repeated lookups of the same key stop hammering the cold tier.
//! The cache is just another tier, keyed like the chain but storing the
//! [`Missing`] marker instead of user values; the stock choice is a
//! [`MemoryTier`](crate::MemoryTier) with a TTL.
//!
//! Every cache failure here degrades to a logged warning. A broken negative
//! cache costs extra chain walks, never correctness.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tier::Tier;

/// Marker stored in the missing cache, meaning "confirmed absent".
///
/// The field is private: no value of this type can be constructed outside
/// the crate, so a cached miss can never collide with a user value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Missing(());

pub(crate) const MISSING: Missing = Missing(());

/// Engine-side handle around the negative cache tier.
pub(crate) struct MissingCache<K> {
    store: Arc<dyn Tier<K, Missing>>,
}

impl<K> MissingCache<K>
where
    K: Clone + Eq + Hash + Display + Send + Sync,
{
    pub(crate) fn new(store: Arc<dyn Tier<K, Missing>>) -> Self {
        Self { store }
    }

    /// True when the key is a confirmed miss. Read errors degrade to
    /// "not cached".
    pub(crate) async fn is_known_missing(&self, key: &K) -> bool {
        match self.store.contains(key).await {
            Ok(cached) => cached,
            Err(error) => {
                warn!(key = %key, error = %error, "failed to read from missing value cache");
                false
            }
        }
    }

    /// Partitions `todo` into (keys still to resolve, keys already confirmed
    /// missing). On a cache error the whole input stays to-resolve.
    pub(crate) async fn partition_batch(&self, todo: Vec<K>) -> (Vec<K>, Vec<K>) {
        let mut cached = HashMap::new();
        match self.store.get_batch(&todo, &mut cached).await {
            Ok(still_todo) => (still_todo, cached.into_keys().collect()),
            Err(error) => {
                warn!(error = %error, "failed to read batch from missing value cache");
                (todo, Vec::new())
            }
        }
    }

    pub(crate) async fn record(&self, key: &K) {
        if let Err(error) = self.store.put(key, &MISSING).await {
            warn!(key = %key, error = %error, "failed to write to missing value cache");
        }
    }

    pub(crate) async fn record_batch(&self, keys: &[K]) {
        if keys.is_empty() {
            return;
        }
        let marks: HashMap<K, Missing> =
            keys.iter().cloned().map(|key| (key, MISSING)).collect();
        if let Err(error) = self.store.put_batch(&marks).await {
            warn!(error = %error, "failed to write batch to missing value cache");
        }
    }

    pub(crate) async fn forget(&self, key: &K) {
        if let Err(error) = self.store.delete(key).await {
            warn!(key = %key, error = %error, "could not erase cached miss");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::MemoryTier;

    fn cache() -> MissingCache<String> {
        MissingCache::new(Arc::new(MemoryTier::new()))
    }

    #[tokio::test]
    async fn test_record_then_known_missing() {
        let cache = cache();
        assert!(!cache.is_known_missing(&"k".to_string()).await);

        cache.record(&"k".to_string()).await;
        assert!(cache.is_known_missing(&"k".to_string()).await);
    }

    #[tokio::test]
    async fn test_forget_clears_the_mark() {
        let cache = cache();
        cache.record(&"k".to_string()).await;
        cache.forget(&"k".to_string()).await;

        assert!(!cache.is_known_missing(&"k".to_string()).await);
    }

    #[tokio::test]
    async fn test_partition_batch_splits_cached_misses() {
        let cache = cache();
        cache.record_batch(&["a".to_string(), "b".to_string()]).await;

        let todo = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (still_todo, cached) = cache.partition_batch(todo).await;

        assert_eq!(still_todo, vec!["c".to_string()]);
        let mut cached = cached;
        cached.sort();
        assert_eq!(cached, vec!["a".to_string(), "b".to_string()]);
    }
}

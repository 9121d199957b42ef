// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The chain store engine.
//!
//! [`ChainStore`] composes an ordered sequence of tiers into a single
//! logical key-value store. Reads walk the chain from the hottest tier to
//! the terminal one and backfill hits upward; writes fan out to every tier
//! in chain order. An optional negative-result cache short-circuits reads
//! of keys already confirmed absent.
//!
//! # Failure policy
//!
//! Only the terminal tier can fail an operation: its answers are
//! authoritative. Any other tier error is logged and treated as "tier
//! reports absence" on reads and "tier skipped" on writes, so a flaky
//! intermediate cache degrades throughput, never availability. Backfill
//! and negative-cache writes are best-effort.
//!
//! # Cancellation
//!
//! Every operation is an ordinary future; dropping it aborts the walk at
//! the next tier boundary. No tier error is ever synthesized for a
//! cancelled call.
//!
//! # Example
//!
//! ```
//! use tierkv::{ChainStore, MemoryTier};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tierkv::ChainError> {
//! let store = ChainStore::builder()
//!     .tier(MemoryTier::new())
//!     .tier(MemoryTier::new())
//!     .build()?;
//!
//! store.put(&"user.1".to_string(), &42u64).await?;
//! assert_eq!(store.get(&"user.1".to_string()).await?, Some(42));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ChainConfig, TierSettings};
use crate::error::{ChainError, TierOp};
use crate::metrics::{record_batch_size, record_read, record_write, LatencyTimer};
use crate::missing::{Missing, MissingCache};
use crate::tier::{MemoryTier, RedisTier, SqlTier, Tier};

/// A chain of tiers behaving as one store.
///
/// The chain is frozen at construction; build one with [`ChainStore::builder`]
/// or [`ChainStore::from_config`]. Cheap to share via `Arc` and safe for
/// concurrent use — the engine holds no locks of its own.
pub struct ChainStore<K, V> {
    chain: Vec<Arc<dyn Tier<K, V>>>,
    missing_cache: Option<MissingCache<K>>,
}

impl<K, V> ChainStore<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn builder() -> ChainStoreBuilder<K, V> {
        ChainStoreBuilder {
            tiers: Vec::new(),
            missing_cache: None,
            settings: TierSettings::default(),
        }
    }

    /// Assemble the stock memory → Redis → SQL chain from configuration.
    ///
    /// The memory tier is always present; Redis and SQL are attached when
    /// their URLs are set. With `missing_cache_enabled`, confirmed misses
    /// are cached in memory for `missing_cache_ttl_secs`.
    pub async fn from_config(config: &ChainConfig) -> Result<Self, ChainError>
    where
        V: Serialize + DeserializeOwned,
    {
        let settings = config.tier_settings();
        let mut builder = Self::builder().settings(settings.clone());

        builder = builder.tier(MemoryTier::new());

        if let Some(url) = &config.redis_url {
            let tier = RedisTier::connect(url, &settings)
                .await
                .map_err(|source| ChainError::Startup {
                    tier: "redis".into(),
                    source,
                })?;
            builder = builder.tier(tier);
        }

        if let Some(url) = &config.sql_url {
            let tier = SqlTier::connect(url, &settings)
                .await
                .map_err(|source| ChainError::Startup {
                    tier: "sql".into(),
                    source,
                })?;
            builder = builder.tier(tier);
        }

        if config.missing_cache_enabled {
            let ttl = Duration::from_secs(config.missing_cache_ttl_secs);
            builder = builder.missing_cache(MemoryTier::with_ttl(ttl));
        }

        builder.build()
    }

    /// Check whether a key exists in any tier.
    ///
    /// Walks the chain until a tier reports the key present. Unlike
    /// [`get`](Self::get), a hit in a deep tier does not backfill the
    /// hotter ones.
    pub async fn contains(&self, key: &K) -> Result<bool, ChainError> {
        let _timer = LatencyTimer::new("contains");

        if let Some(cache) = &self.missing_cache {
            if cache.is_known_missing(key).await {
                record_read("contains", "missing-cache", "cached_miss");
                return Ok(false);
            }
        }

        let last = self.chain.len() - 1;
        for (i, tier) in self.chain.iter().enumerate() {
            match tier.contains(key).await {
                Ok(true) => {
                    record_read("contains", tier.name(), "hit");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(source) if i == last => {
                    record_read("contains", tier.name(), "error");
                    return Err(ChainError::Terminal {
                        tier: tier.name().to_string(),
                        op: TierOp::Contains,
                        key: key.to_string(),
                        source,
                    });
                }
                Err(error) => {
                    warn!(tier = tier.name(), key = %key, error = %error, "could not check existence in tier");
                }
            }
        }

        if let Some(cache) = &self.missing_cache {
            cache.record(key).await;
        }

        record_read("contains", "none", "miss");
        Ok(false)
    }

    /// Fetch a value, searching the chain from the hottest tier down.
    ///
    /// A hit found at tier `k` is written back into every tier above it
    /// (best-effort) so the next lookup is served hot. A confirmed miss is
    /// recorded in the negative cache when one is configured.
    pub async fn get(&self, key: &K) -> Result<Option<V>, ChainError> {
        let _timer = LatencyTimer::new("get");

        if let Some(cache) = &self.missing_cache {
            if cache.is_known_missing(key).await {
                record_read("get", "missing-cache", "cached_miss");
                return Ok(None);
            }
        }

        let last = self.chain.len() - 1;
        let mut found: Option<(usize, V)> = None;

        for (i, tier) in self.chain.iter().enumerate() {
            match tier.get(key).await {
                Ok(Some(value)) => {
                    found = Some((i, value));
                    break;
                }
                Ok(None) => {}
                Err(source) if i == last => {
                    record_read("get", tier.name(), "error");
                    return Err(ChainError::Terminal {
                        tier: tier.name().to_string(),
                        op: TierOp::Get,
                        key: key.to_string(),
                        source,
                    });
                }
                Err(error) => {
                    warn!(tier = tier.name(), key = %key, error = %error, "could not get from tier");
                }
            }
        }

        let Some((found_in, value)) = found else {
            if let Some(cache) = &self.missing_cache {
                cache.record(key).await;
            }
            record_read("get", "none", "miss");
            return Ok(None);
        };

        // propagate the hit to the hotter tiers, best-effort
        for tier in self.chain[..found_in].iter().rev() {
            if let Err(error) = tier.put(key, &value).await {
                warn!(tier = tier.name(), key = %key, error = %error, "could not backfill into tier");
            }
        }

        record_read("get", self.chain[found_in].name(), "hit");
        Ok(Some(value))
    }

    /// Fetch many keys at once.
    ///
    /// Hits are inserted into `values`; the returned list holds the keys
    /// found nowhere. Each tier is asked only for the keys every hotter
    /// tier missed, and backfill into tier `i` is scoped to the keys tier
    /// `i` itself reported missing — a key already present in a tier is
    /// never rewritten there.
    pub async fn get_batch(
        &self,
        keys: &[K],
        values: &mut HashMap<K, V>,
    ) -> Result<Vec<K>, ChainError> {
        let _timer = LatencyTimer::new("get_batch");

        if keys.is_empty() {
            return Ok(Vec::new());
        }
        record_batch_size("get_batch", keys.len());

        let mut todo: Vec<K> = keys.to_vec();
        let mut cached_missing: Vec<K> = Vec::new();

        if let Some(cache) = &self.missing_cache {
            let (still_todo, cached) = cache.partition_batch(todo).await;
            todo = still_todo;
            cached_missing = cached;
        }

        if todo.is_empty() {
            record_read("get_batch", "missing-cache", "cached_miss");
            return Ok(cached_missing);
        }

        let last = self.chain.len() - 1;
        let mut refill: Vec<Vec<K>> = vec![Vec::new(); self.chain.len()];
        let mut found_in = self.chain.len();

        for (i, tier) in self.chain.iter().enumerate() {
            match tier.get_batch(&todo, values).await {
                Ok(missing) => refill[i] = missing,
                Err(source) if i == last => {
                    record_read("get_batch", tier.name(), "error");
                    return Err(ChainError::TerminalBatch {
                        tier: tier.name().to_string(),
                        op: TierOp::GetBatch,
                        source,
                    });
                }
                Err(error) => {
                    // a failed tier is treated as missing the whole batch;
                    // deeper tiers re-answer for it and backfill restores it
                    warn!(tier = tier.name(), error = %error, "could not get batch from tier");
                    refill[i] = todo.clone();
                }
            }

            todo = refill[i].clone();

            if todo.is_empty() {
                found_in = i;
                break;
            }
        }

        // propagate hits to the hotter tiers, scoped per tier to its own
        // misses, best-effort
        for i in (0..found_in).rev() {
            if refill[i].is_empty() {
                continue;
            }

            let backfill: HashMap<K, V> = refill[i]
                .iter()
                .filter_map(|key| values.get(key).map(|value| (key.clone(), value.clone())))
                .collect();

            if backfill.is_empty() {
                continue;
            }

            if let Err(error) = self.chain[i].put_batch(&backfill).await {
                warn!(tier = self.chain[i].name(), error = %error, "could not backfill batch into tier");
            } else {
                debug!(tier = self.chain[i].name(), count = backfill.len(), "backfilled batch into tier");
            }
        }

        if let Some(cache) = &self.missing_cache {
            cache.record_batch(&todo).await;
        }

        record_batch_size("get_batch_missing", todo.len() + cached_missing.len());

        let mut missing = todo;
        missing.extend(cached_missing);
        Ok(missing)
    }

    /// Write a value to every tier, hottest first.
    ///
    /// A failure in any tier but the terminal one is logged and skipped;
    /// a terminal failure fails the call. The negative-cache entry for the
    /// key is dropped only after every tier holds the value.
    pub async fn put(&self, key: &K, value: &V) -> Result<(), ChainError> {
        let _timer = LatencyTimer::new("put");

        let last = self.chain.len() - 1;
        for (i, tier) in self.chain.iter().enumerate() {
            if let Err(source) = tier.put(key, value).await {
                if i == last {
                    record_write("put", "error");
                    return Err(ChainError::Terminal {
                        tier: tier.name().to_string(),
                        op: TierOp::Put,
                        key: key.to_string(),
                        source,
                    });
                }
                warn!(tier = tier.name(), key = %key, error = %source, "could not put to tier");
            }
        }

        if let Some(cache) = &self.missing_cache {
            cache.forget(key).await;
        }

        record_write("put", "success");
        Ok(())
    }

    /// Write many values to every tier, hottest first.
    ///
    /// Same failure policy as [`put`](Self::put); negative-cache entries
    /// are dropped per key after all tiers are written.
    pub async fn put_batch(&self, values: &HashMap<K, V>) -> Result<(), ChainError> {
        let _timer = LatencyTimer::new("put_batch");

        if values.is_empty() {
            return Ok(());
        }
        record_batch_size("put_batch", values.len());

        let last = self.chain.len() - 1;
        for (i, tier) in self.chain.iter().enumerate() {
            if let Err(source) = tier.put_batch(values).await {
                if i == last {
                    record_write("put_batch", "error");
                    return Err(ChainError::TerminalBatch {
                        tier: tier.name().to_string(),
                        op: TierOp::PutBatch,
                        source,
                    });
                }
                warn!(tier = tier.name(), error = %source, "could not put batch to tier");
            }
        }

        if let Some(cache) = &self.missing_cache {
            for key in values.keys() {
                cache.forget(key).await;
            }
        }

        record_write("put_batch", "success");
        Ok(())
    }
}

/// Builds a [`ChainStore`]. Tiers are walked in the order they are added;
/// the last one added is the terminal, authoritative tier.
pub struct ChainStoreBuilder<K, V> {
    tiers: Vec<Arc<dyn Tier<K, V>>>,
    missing_cache: Option<Arc<dyn Tier<K, Missing>>>,
    settings: TierSettings,
}

impl<K, V> ChainStoreBuilder<K, V>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Settings handed to [`tier_with`](Self::tier_with) factories.
    #[must_use]
    pub fn settings(mut self, settings: TierSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Append a tier to the chain.
    #[must_use]
    pub fn tier<T>(mut self, tier: T) -> Self
    where
        T: Tier<K, V> + 'static,
    {
        self.tiers.push(Arc::new(tier));
        self
    }

    /// Append a tier built by `factory` from the shared settings.
    #[must_use]
    pub fn tier_with<T, F>(self, factory: F) -> Self
    where
        T: Tier<K, V> + 'static,
        F: FnOnce(&TierSettings) -> T,
    {
        let tier = factory(&self.settings);
        self.tier(tier)
    }

    /// Enable the negative cache, backed by the given tier-shaped store.
    #[must_use]
    pub fn missing_cache<T>(mut self, cache: T) -> Self
    where
        T: Tier<K, Missing> + 'static,
    {
        self.missing_cache = Some(Arc::new(cache));
        self
    }

    /// Freeze the chain. Fails with [`ChainError::EmptyChain`] when no
    /// tier was added.
    pub fn build(self) -> Result<ChainStore<K, V>, ChainError> {
        if self.tiers.is_empty() {
            return Err(ChainError::EmptyChain);
        }

        Ok(ChainStore {
            chain: self.tiers,
            missing_cache: self.missing_cache.map(MissingCache::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TierError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory tier that counts reads and puts, for asserting which tiers
    /// an operation touched. Counter handles survive moving the tier into
    /// a chain.
    struct CountingTier {
        inner: MemoryTier<String, i64>,
        reads: Arc<AtomicUsize>,
        puts: Arc<AtomicUsize>,
    }

    impl CountingTier {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let reads = Arc::new(AtomicUsize::new(0));
            let puts = Arc::new(AtomicUsize::new(0));
            let tier = Self {
                inner: MemoryTier::new(),
                reads: reads.clone(),
                puts: puts.clone(),
            };
            (tier, reads, puts)
        }
    }

    #[async_trait]
    impl Tier<String, i64> for CountingTier {
        fn name(&self) -> &str {
            "counting"
        }

        async fn contains(&self, key: &String) -> Result<bool, TierError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.contains(key).await
        }

        async fn get(&self, key: &String) -> Result<Option<i64>, TierError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn get_batch(
            &self,
            keys: &[String],
            found: &mut HashMap<String, i64>,
        ) -> Result<Vec<String>, TierError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_batch(keys, found).await
        }

        async fn put(&self, key: &String, value: &i64) -> Result<(), TierError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &String) -> Result<(), TierError> {
            self.inner.delete(key).await
        }
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_build_empty_chain_fails() {
        let result = ChainStore::<String, i64>::builder().build();
        assert!(matches!(result, Err(ChainError::EmptyChain)));
    }

    #[tokio::test]
    async fn test_single_tier_pass_through() {
        let store = ChainStore::builder().tier(MemoryTier::new()).build().unwrap();

        store.put(&key("a"), &1).await.unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));
        assert!(store.contains(&key("a")).await.unwrap());
        assert_eq!(store.get(&key("b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_backfills_hotter_tiers() {
        let hot = MemoryTier::new();
        let warm = MemoryTier::new();
        let cold = MemoryTier::new();
        cold.put(&key("a"), &1).await.unwrap();

        let store = ChainStore::builder().tier(hot).tier(warm).tier(cold).build().unwrap();

        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));

        // both hotter tiers now hold the value
        let hot = &store.chain[0];
        let warm = &store.chain[1];
        assert_eq!(hot.get(&key("a")).await.unwrap(), Some(1));
        assert_eq!(warm.get(&key("a")).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_contains_does_not_backfill() {
        let cold = MemoryTier::new();
        cold.put(&key("a"), &1).await.unwrap();

        let store = ChainStore::builder().tier(MemoryTier::new()).tier(cold).build().unwrap();

        assert!(store.contains(&key("a")).await.unwrap());

        let hot = &store.chain[0];
        assert_eq!(hot.get(&key("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_cache_short_circuits_repeat_misses() {
        let (tier, reads, _puts) = CountingTier::new();
        let store = ChainStore::builder()
            .tier(tier)
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        assert_eq!(store.get(&key("x")).await.unwrap(), None);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        // the second lookup is answered by the negative cache
        assert_eq!(store.get(&key("x")).await.unwrap(), None);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backfill_skips_tiers_that_had_the_key() {
        let (hot, _reads, hot_puts) = CountingTier::new();
        hot.inner.put(&key("a"), &1).await.unwrap();

        let cold = MemoryTier::new();
        cold.put(&key("a"), &1).await.unwrap();
        cold.put(&key("b"), &2).await.unwrap();

        let store = ChainStore::builder().tier(hot).tier(cold).build().unwrap();

        let mut values = HashMap::new();
        let missing = store
            .get_batch(&[key("a"), key("b")], &mut values)
            .await
            .unwrap();

        assert!(missing.is_empty());
        assert_eq!(values.len(), 2);
        // only "b" was backfilled; "a" was already present in the hot tier
        assert_eq!(hot_puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_put_invalidates_missing_cache() {
        let store = ChainStore::builder()
            .tier(MemoryTier::new())
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        // cache the miss
        assert_eq!(store.get(&key("k")).await.unwrap(), None);

        store.put(&key("k"), &5).await.unwrap();

        assert_eq!(store.get(&key("k")).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_contains_records_miss_and_short_circuits() {
        let store: ChainStore<String, i64> = ChainStore::builder()
            .tier(MemoryTier::new())
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        assert!(!store.contains(&key("x")).await.unwrap());
        // the mark also short-circuits gets
        assert_eq!(store.get(&key("x")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_batch_empty_input_touches_nothing() {
        let store: ChainStore<String, i64> = ChainStore::builder()
            .tier(MemoryTier::new())
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        let mut values = HashMap::new();
        let missing = store.get_batch(&[], &mut values).await.unwrap();
        assert!(missing.is_empty());
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_get_batch_partial_refill() {
        let hot = MemoryTier::new();
        hot.put(&key("a"), &1).await.unwrap();
        let cold = MemoryTier::new();
        cold.put(&key("a"), &1).await.unwrap();
        cold.put(&key("b"), &2).await.unwrap();

        let store = ChainStore::builder().tier(hot).tier(cold).build().unwrap();

        let keys = vec![key("a"), key("b"), key("c")];
        let mut values = HashMap::new();
        let missing = store.get_batch(&keys, &mut values).await.unwrap();

        assert_eq!(missing, vec![key("c")]);
        assert_eq!(values.len(), 2);
        assert_eq!(values["a"], 1);
        assert_eq!(values["b"], 2);

        // "b" was backfilled into the hot tier
        let hot = &store.chain[0];
        assert_eq!(hot.get(&key("b")).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_get_batch_cached_misses_skip_the_chain() {
        let store: ChainStore<String, i64> = ChainStore::builder()
            .tier(MemoryTier::new())
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        // confirm and cache both misses
        let mut values = HashMap::new();
        let missing = store
            .get_batch(&[key("x"), key("y")], &mut values)
            .await
            .unwrap();
        assert_eq!(missing.len(), 2);

        // second call is answered entirely by the negative cache
        let mut values = HashMap::new();
        let mut missing = store
            .get_batch(&[key("x"), key("y")], &mut values)
            .await
            .unwrap();
        missing.sort();
        assert_eq!(missing, vec![key("x"), key("y")]);
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_get_batch_mixes_cached_and_fresh_misses() {
        let tier = MemoryTier::new();
        tier.put(&key("a"), &1).await.unwrap();

        let store = ChainStore::builder()
            .tier(tier)
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        // cache the "x" miss
        assert_eq!(store.get(&key("x")).await.unwrap(), None);

        let mut values = HashMap::new();
        let mut missing = store
            .get_batch(&[key("a"), key("x"), key("y")], &mut values)
            .await
            .unwrap();
        missing.sort();

        assert_eq!(missing, vec![key("x"), key("y")]);
        assert_eq!(values["a"], 1);
    }

    #[tokio::test]
    async fn test_put_batch_reaches_all_tiers() {
        let store = ChainStore::builder()
            .tier(MemoryTier::new())
            .tier(MemoryTier::new())
            .build()
            .unwrap();

        let values: HashMap<String, i64> = [(key("a"), 1), (key("b"), 2)].into();
        store.put_batch(&values).await.unwrap();

        for tier in &store.chain {
            assert_eq!(tier.get(&key("a")).await.unwrap(), Some(1));
            assert_eq!(tier.get(&key("b")).await.unwrap(), Some(2));
        }
    }

    #[tokio::test]
    async fn test_put_batch_invalidates_missing_cache() {
        let store = ChainStore::builder()
            .tier(MemoryTier::new())
            .missing_cache(MemoryTier::new())
            .build()
            .unwrap();

        assert_eq!(store.get(&key("a")).await.unwrap(), None);
        assert_eq!(store.get(&key("b")).await.unwrap(), None);

        let values: HashMap<String, i64> = [(key("a"), 1), (key("b"), 2)].into();
        store.put_batch(&values).await.unwrap();

        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));
        assert_eq!(store.get(&key("b")).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = ChainStore::builder().tier(MemoryTier::new()).build().unwrap();

        store.put(&key("k"), &9).await.unwrap();
        store.put(&key("k"), &9).await.unwrap();

        assert_eq!(store.get(&key("k")).await.unwrap(), Some(9));
    }
}

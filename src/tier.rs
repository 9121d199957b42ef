//! Backing tiers and the contract they satisfy.
//!
//! A [`Tier`] is one layer of the chain: an in-process map, a shared Redis
//! cache, a SQL archive, or anything else that can answer point and batch
//! lookups. Tiers are composed by [`ChainStore`](crate::ChainStore), which
//! owns ordering, backfill, and the failure policy; a tier only has to
//! answer for itself and must never coordinate with other tiers.
//!
//! # Implementing a tier
//!
//! ```
//! use std::collections::HashMap;
//! use async_trait::async_trait;
//! use tierkv::{Tier, TierError};
//!
//! struct Stub;
//!
//! #[async_trait]
//! impl Tier<String, u64> for Stub {
//!     fn name(&self) -> &str {
//!         "stub"
//!     }
//!
//!     async fn contains(&self, _key: &String) -> Result<bool, TierError> {
//!         Ok(false)
//!     }
//!
//!     async fn get(&self, _key: &String) -> Result<Option<u64>, TierError> {
//!         Ok(None)
//!     }
//!
//!     async fn get_batch(
//!         &self,
//!         keys: &[String],
//!         _found: &mut HashMap<String, u64>,
//!     ) -> Result<Vec<String>, TierError> {
//!         Ok(keys.to_vec())
//!     }
//!
//!     async fn put(&self, _key: &String, _value: &u64) -> Result<(), TierError> {
//!         Ok(())
//!     }
//!
//!     async fn delete(&self, _key: &String) -> Result<(), TierError> {
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::TierError;

pub mod memory;
pub mod redis;
pub mod sql;

pub use memory::MemoryTier;
pub use self::redis::RedisTier;
pub use self::sql::SqlTier;

/// Contract every backing tier satisfies.
///
/// Tiers may block on I/O and must be safe for concurrent invocation by
/// multiple callers. Per-key mutual exclusion is the tier's own business;
/// the chain performs no locking on its behalf.
#[async_trait]
pub trait Tier<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Check whether a key exists without transferring the value.
    async fn contains(&self, key: &K) -> Result<bool, TierError>;

    /// Fetch a single value.
    async fn get(&self, key: &K) -> Result<Option<V>, TierError>;

    /// Fetch many values at once.
    ///
    /// Populates `found` for every hit and returns the subset of `keys`
    /// not present in this tier. Successive tiers of a chain accumulate
    /// into the same `found` map.
    async fn get_batch(
        &self,
        keys: &[K],
        found: &mut HashMap<K, V>,
    ) -> Result<Vec<K>, TierError>;

    /// Store a single value, overwriting any previous one.
    async fn put(&self, key: &K, value: &V) -> Result<(), TierError>;

    /// Store many values at once.
    ///
    /// Default implementation falls back to sequential puts; backends
    /// override it with pipelining or transactions.
    async fn put_batch(&self, values: &HashMap<K, V>) -> Result<(), TierError> {
        for (key, value) in values {
            self.put(key, value).await?;
        }
        Ok(())
    }

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &K) -> Result<(), TierError>;
}

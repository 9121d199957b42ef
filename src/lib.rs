//! # tierkv
//!
//! A tiered key-value store engine: an ordered chain of backing tiers
//! behaving as one logical store.
//!
//! ## Architecture
//!
//! Reads walk the chain top-down and backfill hits upward; writes fan out
//! top-down to every tier:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ChainStore<K, V>                      │
//! │  • contains / get / get_batch / put / put_batch             │
//! │  • negative cache short-circuits confirmed misses           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      T₀: Memory tier                        │
//! │  • DashMap, optional TTL                                    │
//! │  • errors tolerated: logged, treated as absence             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (miss: ask the next tier,
//!                     hit below: backfill up)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      T₁: Redis tier                         │
//! │  • JSON values, MGET / pipelined batches                    │
//! │  • errors tolerated: logged, treated as absence             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 T₂: SQL tier (terminal)                     │
//! │  • SQLite/MySQL via sqlx Any, ground truth                  │
//! │  • errors are fatal, absence is authoritative               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any [`Tier`] implementation can stand in at any position; the stock
//! memory → Redis → SQL chain is just what [`ChainStore::from_config`]
//! assembles.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierkv::{ChainConfig, ChainStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tierkv::ChainError> {
//!     let config = ChainConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         sql_url: Some("sqlite:chain.db".into()),
//!         missing_cache_enabled: true,
//!         ..Default::default()
//!     };
//!
//!     let store: ChainStore<String, serde_json::Value> =
//!         ChainStore::from_config(&config).await?;
//!
//!     store
//!         .put(&"user.1".into(), &serde_json::json!({"name": "Alice"}))
//!         .await?;
//!
//!     // L1 hit from here on; a cold start would read SQL and backfill
//!     if let Some(user) = store.get(&"user.1".into()).await? {
//!         println!("found: {user}");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Chained tiers**: hot → warm → cold with automatic read-through and
//!   upward backfill
//! - **Negative cache**: confirmed misses are remembered, so absent keys
//!   stop hammering the cold tier
//! - **Failure degradation**: only the terminal tier can fail an
//!   operation; flaky intermediate tiers are logged and skipped
//! - **Batch bookkeeping**: batch reads funnel only still-missing keys to
//!   deeper tiers and backfill each tier with exactly what it missed
//! - **Typed keys and values**: the engine is generic; serialization is a
//!   backend concern
//!
//! ## Modules
//!
//! - [`chain`]: the [`ChainStore`] engine and its builder
//! - [`tier`]: the [`Tier`] contract and the stock backends
//! - [`missing`]: the negative-result cache and its [`Missing`] marker
//! - [`config`]: [`ChainConfig`] / [`TierSettings`]
//! - [`error`]: [`ChainError`] / [`TierError`]
//! - [`retry`]: backoff helper used by the backend tiers
//! - [`metrics`]: operation counters and latency histograms

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod missing;
pub mod retry;
pub mod tier;

pub use chain::{ChainStore, ChainStoreBuilder};
pub use config::{ChainConfig, TierSettings};
pub use error::{ChainError, TierError, TierOp};
pub use missing::Missing;
pub use retry::RetryConfig;
pub use tier::{MemoryTier, RedisTier, SqlTier, Tier};

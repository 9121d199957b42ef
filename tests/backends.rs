//! Round-trips against the stock backend tiers.
//!
//! The SQL tests run against in-memory SQLite and need nothing installed.
//! The Redis tests use testcontainers for portability and require Docker:
//!
//! ```bash
//! cargo test --test backends -- --ignored
//! ```

use std::collections::HashMap;

use tierkv::{ChainConfig, ChainStore, SqlTier, Tier, TierSettings};

async fn sqlite_tier() -> Box<dyn Tier<String, i64>> {
    let tier = SqlTier::connect("sqlite::memory:", &TierSettings::default())
        .await
        .expect("sqlite connect failed");
    Box::new(tier)
}

fn key(s: &str) -> String {
    s.to_string()
}

#[tokio::test]
async fn sql_round_trip() {
    let tier = sqlite_tier().await;

    assert_eq!(tier.get(&key("a")).await.unwrap(), None);
    assert!(!tier.contains(&key("a")).await.unwrap());

    tier.put(&key("a"), &1).await.unwrap();

    assert_eq!(tier.get(&key("a")).await.unwrap(), Some(1));
    assert!(tier.contains(&key("a")).await.unwrap());
}

#[tokio::test]
async fn sql_put_overwrites() {
    let tier = sqlite_tier().await;

    tier.put(&key("k"), &1).await.unwrap();
    tier.put(&key("k"), &2).await.unwrap();

    assert_eq!(tier.get(&key("k")).await.unwrap(), Some(2));
}

#[tokio::test]
async fn sql_delete_is_idempotent() {
    let tier = sqlite_tier().await;

    tier.put(&key("k"), &1).await.unwrap();
    tier.delete(&key("k")).await.unwrap();
    tier.delete(&key("k")).await.unwrap();

    assert_eq!(tier.get(&key("k")).await.unwrap(), None);
}

#[tokio::test]
async fn sql_get_batch_splits_found_and_missing() {
    let tier = sqlite_tier().await;

    tier.put(&key("a"), &1).await.unwrap();
    tier.put(&key("b"), &2).await.unwrap();

    let mut found = HashMap::new();
    let missing = tier
        .get_batch(&[key("a"), key("x"), key("b")], &mut found)
        .await
        .unwrap();

    assert_eq!(missing, vec![key("x")]);
    assert_eq!(found["a"], 1);
    assert_eq!(found["b"], 2);
}

#[tokio::test]
async fn sql_put_batch_round_trip() {
    let tier = sqlite_tier().await;

    let values: HashMap<String, i64> = (0..10).map(|i| (format!("k{i}"), i)).collect();
    tier.put_batch(&values).await.unwrap();

    let keys: Vec<String> = values.keys().cloned().collect();
    let mut found = HashMap::new();
    let missing = tier.get_batch(&keys, &mut found).await.unwrap();

    assert!(missing.is_empty());
    assert_eq!(found, values);
}

#[tokio::test]
async fn sql_rejects_hostile_table_names() {
    let settings = TierSettings {
        table: "entries; DROP TABLE users".into(),
        ..Default::default()
    };
    let result = SqlTier::connect("sqlite::memory:", &settings).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn chain_over_sqlite_backfills_and_caches_misses() {
    let config = ChainConfig {
        sql_url: Some("sqlite::memory:".into()),
        missing_cache_enabled: true,
        ..Default::default()
    };
    let store: ChainStore<String, i64> = ChainStore::from_config(&config).await.unwrap();

    store.put(&key("user.1"), &42).await.unwrap();
    assert_eq!(store.get(&key("user.1")).await.unwrap(), Some(42));

    // a confirmed miss, then the cached answer
    assert_eq!(store.get(&key("user.2")).await.unwrap(), None);
    assert_eq!(store.get(&key("user.2")).await.unwrap(), None);

    // writing resurrects the key despite the cached miss
    store.put(&key("user.2"), &7).await.unwrap();
    assert_eq!(store.get(&key("user.2")).await.unwrap(), Some(7));
}

mod redis_backed {
    use super::*;
    use testcontainers::{clients::Cli, core::WaitFor, GenericImage};
    use tierkv::RedisTier;

    fn redis_image() -> GenericImage {
        GenericImage::new("redis", "7-alpine")
            .with_exposed_port(6379)
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
    }

    #[tokio::test]
    #[ignore]
    async fn redis_round_trip() {
        let docker = Cli::default();
        let node = docker.run(redis_image());
        let url = format!("redis://127.0.0.1:{}", node.get_host_port_ipv4(6379));

        let settings = TierSettings {
            key_prefix: Some("tierkv-test:".into()),
            ..Default::default()
        };
        let tier: Box<dyn Tier<String, i64>> =
            Box::new(RedisTier::connect(&url, &settings).await.unwrap());

        assert_eq!(tier.get(&key("a")).await.unwrap(), None);

        tier.put(&key("a"), &1).await.unwrap();
        assert_eq!(tier.get(&key("a")).await.unwrap(), Some(1));
        assert!(tier.contains(&key("a")).await.unwrap());

        let values: HashMap<String, i64> = [(key("b"), 2), (key("c"), 3)].into();
        tier.put_batch(&values).await.unwrap();

        let mut found = HashMap::new();
        let missing = tier
            .get_batch(&[key("a"), key("b"), key("c"), key("x")], &mut found)
            .await
            .unwrap();
        assert_eq!(missing, vec![key("x")]);
        assert_eq!(found.len(), 3);

        tier.delete(&key("a")).await.unwrap();
        assert_eq!(tier.get(&key("a")).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn chain_over_redis_and_sqlite() {
        let docker = Cli::default();
        let node = docker.run(redis_image());

        let config = ChainConfig {
            redis_url: Some(format!("redis://127.0.0.1:{}", node.get_host_port_ipv4(6379))),
            sql_url: Some("sqlite::memory:".into()),
            missing_cache_enabled: true,
            key_prefix: Some("tierkv-chain:".into()),
            ..Default::default()
        };
        let store: ChainStore<String, i64> = ChainStore::from_config(&config).await.unwrap();

        store.put(&key("a"), &1).await.unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(1));

        let mut values = HashMap::new();
        let missing = store
            .get_batch(&[key("a"), key("z")], &mut values)
            .await
            .unwrap();
        assert_eq!(missing, vec![key("z")]);
        assert_eq!(values["a"], 1);
    }
}

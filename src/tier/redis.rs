//! Redis tier for the warm, network-shared layer of a chain.
//!
//! Values are stored as JSON blobs under `{prefix}{key}`; the prefix enables
//! namespacing when sharing a Redis instance with other applications. Batch
//! reads use a single `MGET`, batch writes a single pipeline. An optional
//! TTL turns the tier into a bounded cache without any engine involvement.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Tier;
use crate::config::TierSettings;
use crate::error::TierError;
use crate::retry::{retry, RetryConfig};

pub struct RedisTier {
    connection: ConnectionManager,
    prefix: String,
    ttl_secs: Option<u64>,
}

impl RedisTier {
    /// Connect with startup-mode retry (fails fast on a bad URL).
    ///
    /// Uses `key_prefix` and `ttl_secs` from the settings.
    pub async fn connect(url: &str, settings: &TierSettings) -> Result<Self, TierError> {
        let client = Client::open(url).map_err(|e| TierError::Connection(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || {
            let client = client.clone();
            async move { ConnectionManager::new(client).await }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Connection(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: settings.key_prefix.clone().unwrap_or_default(),
            ttl_secs: settings.ttl_secs,
        })
    }

    fn rendered_key<K: Display>(&self, key: &K) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>, TierError> {
        serde_json::to_vec(value).map_err(|e| TierError::Codec(e.to_string()))
    }

    fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, TierError> {
        serde_json::from_slice(bytes).map_err(|e| TierError::Codec(e.to_string()))
    }
}

#[async_trait]
impl<K, V> Tier<K, V> for RedisTier
where
    K: Clone + Eq + Hash + Display + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        "redis"
    }

    async fn contains(&self, key: &K) -> Result<bool, TierError> {
        let conn = self.connection.clone();
        let rendered = self.rendered_key(key);

        retry("redis_exists", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = rendered.clone();
            async move {
                let exists: bool = conn.exists(&key).await?;
                Ok(exists)
            }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Backend(e.to_string()))
    }

    async fn get(&self, key: &K) -> Result<Option<V>, TierError> {
        let conn = self.connection.clone();
        let rendered = self.rendered_key(key);

        let data: Option<Vec<u8>> = retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = rendered.clone();
            async move {
                let data: Option<Vec<u8>> = conn.get(&key).await?;
                Ok(data)
            }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Backend(e.to_string()))?;

        data.map(|bytes| Self::decode(&bytes)).transpose()
    }

    async fn get_batch(
        &self,
        keys: &[K],
        found: &mut HashMap<K, V>,
    ) -> Result<Vec<K>, TierError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let rendered: Vec<String> = keys.iter().map(|k| self.rendered_key(k)).collect();
        let conn = self.connection.clone();

        // raw MGET keeps the reply an array even for a single key
        let rows: Vec<Option<Vec<u8>>> = retry("redis_get_batch", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let rendered = rendered.clone();
            async move { cmd("MGET").arg(&rendered).query_async(&mut conn).await }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Backend(e.to_string()))?;

        let mut missing = Vec::new();
        for (key, row) in keys.iter().zip(rows) {
            match row {
                Some(bytes) => {
                    found.insert(key.clone(), Self::decode(&bytes)?);
                }
                None => missing.push(key.clone()),
            }
        }
        Ok(missing)
    }

    async fn put(&self, key: &K, value: &V) -> Result<(), TierError> {
        let data = Self::encode(value)?;
        let conn = self.connection.clone();
        let rendered = self.rendered_key(key);
        let ttl_secs = self.ttl_secs;

        retry("redis_put", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = rendered.clone();
            let data = data.clone();
            async move {
                match ttl_secs {
                    Some(ttl) => {
                        let _: () = cmd("SETEX")
                            .arg(&key)
                            .arg(ttl)
                            .arg(&data)
                            .query_async(&mut conn)
                            .await?;
                    }
                    None => {
                        let _: () = conn.set(&key, &data).await?;
                    }
                }
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Backend(e.to_string()))
    }

    async fn put_batch(&self, values: &HashMap<K, V>) -> Result<(), TierError> {
        if values.is_empty() {
            return Ok(());
        }

        let mut prepared = Vec::with_capacity(values.len());
        for (key, value) in values {
            prepared.push((self.rendered_key(key), Self::encode(value)?));
        }

        let conn = self.connection.clone();
        let ttl_secs = self.ttl_secs;

        retry("redis_put_batch", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let prepared = prepared.clone();
            async move {
                let mut pipeline = pipe();
                for (key, data) in &prepared {
                    match ttl_secs {
                        Some(ttl) => {
                            pipeline.cmd("SETEX").arg(key).arg(ttl).arg(data).ignore();
                        }
                        None => {
                            pipeline.cmd("SET").arg(key).arg(data).ignore();
                        }
                    }
                }
                let _: () = pipeline.query_async(&mut conn).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &K) -> Result<(), TierError> {
        let conn = self.connection.clone();
        let rendered = self.rendered_key(key);

        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = rendered.clone();
            async move {
                let _: () = conn.del(&key).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: redis::RedisError| TierError::Backend(e.to_string()))
    }
}

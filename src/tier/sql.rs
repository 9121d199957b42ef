//! SQL tier for the cold, authoritative end of a chain.
//!
//! Backed by sqlx's `Any` driver so the same tier runs against SQLite (local
//! or embedded deployments) and MySQL. Entries live in a two-column table,
//! key and JSON-encoded value; the table name comes from [`TierSettings`].
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver surfaces MySQL `LONGTEXT` columns as bytes rather than
//! strings, so reads go through a bytes-first accessor. Values are stored as
//! JSON text either way.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::Tier;
use crate::config::TierSettings;
use crate::error::TierError;
use crate::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlTier {
    pool: AnyPool,
    table: String,
    is_sqlite: bool,
}

impl SqlTier {
    /// Connect with startup-mode retry and create the table if needed.
    ///
    /// Uses `table` from the settings; the name must be a plain identifier
    /// because it is interpolated into statements, not bound.
    pub async fn connect(url: &str, settings: &TierSettings) -> Result<Self, TierError> {
        install_drivers();

        let table = settings.table.clone();
        if !is_valid_table_name(&table) {
            return Err(TierError::Backend(format!(
                "invalid table name '{table}': expected [A-Za-z0-9_]+"
            )));
        }

        let is_sqlite = url.starts_with("sqlite:");
        // sqlite gets a single connection: the Any driver opens one database
        // per connection for `sqlite::memory:`
        let max_connections = if is_sqlite { 1 } else { 16 };

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(|e| TierError::Connection(e.to_string()))
        })
        .await?;

        let store = Self {
            pool,
            table,
            is_sqlite,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing with other components.
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn init_schema(&self) -> Result<(), TierError> {
        let sql = if self.is_sqlite {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (k TEXT PRIMARY KEY, v TEXT NOT NULL)",
                self.table
            )
        } else {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (k VARCHAR(255) PRIMARY KEY, v LONGTEXT NOT NULL)",
                self.table
            )
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| TierError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    fn upsert_sql(&self) -> String {
        if self.is_sqlite {
            format!(
                "INSERT INTO {} (k, v) VALUES (?, ?) ON CONFLICT(k) DO UPDATE SET v = excluded.v",
                self.table
            )
        } else {
            format!(
                "INSERT INTO {} (k, v) VALUES (?, ?) ON DUPLICATE KEY UPDATE v = VALUES(v)",
                self.table
            )
        }
    }

    // The Any driver reports text columns as bytes on MySQL, as String on
    // SQLite; accept both.
    fn column_text(row: &AnyRow, column: &str) -> Result<String, TierError> {
        if let Ok(text) = row.try_get::<String, _>(column) {
            return Ok(text);
        }
        let bytes: Vec<u8> = row
            .try_get(column)
            .map_err(|e| TierError::Backend(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| TierError::Codec(e.to_string()))
    }

    fn encode<V: Serialize>(value: &V) -> Result<String, TierError> {
        serde_json::to_string(value).map_err(|e| TierError::Codec(e.to_string()))
    }

    fn decode<V: DeserializeOwned>(text: &str) -> Result<V, TierError> {
        serde_json::from_str(text).map_err(|e| TierError::Codec(e.to_string()))
    }
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[async_trait]
impl<K, V> Tier<K, V> for SqlTier
where
    K: Clone + Eq + Hash + Display + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        "sql"
    }

    async fn contains(&self, key: &K) -> Result<bool, TierError> {
        let sql = format!("SELECT 1 FROM {} WHERE k = ? LIMIT 1", self.table);
        let key = key.to_string();

        retry("sql_exists", &RetryConfig::query(), || async {
            let row = sqlx::query(&sql)
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| TierError::Backend(e.to_string()))?;
            Ok(row.is_some())
        })
        .await
    }

    async fn get(&self, key: &K) -> Result<Option<V>, TierError> {
        let sql = format!("SELECT v FROM {} WHERE k = ?", self.table);
        let key = key.to_string();

        let text = retry("sql_get", &RetryConfig::query(), || async {
            let row = sqlx::query(&sql)
                .bind(&key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| TierError::Backend(e.to_string()))?;
            row.map(|row| Self::column_text(&row, "v")).transpose()
        })
        .await?;

        text.map(|text| Self::decode(&text)).transpose()
    }

    async fn get_batch(
        &self,
        keys: &[K],
        found: &mut HashMap<K, V>,
    ) -> Result<Vec<K>, TierError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let by_rendered: HashMap<String, K> = keys
            .iter()
            .map(|key| (key.to_string(), key.clone()))
            .collect();

        let placeholders = vec!["?"; by_rendered.len()].join(", ");
        let sql = format!(
            "SELECT k, v FROM {} WHERE k IN ({placeholders})",
            self.table
        );
        let rendered: Vec<String> = by_rendered.keys().cloned().collect();

        let rows = retry("sql_get_batch", &RetryConfig::query(), || async {
            let mut query = sqlx::query(&sql);
            for key in &rendered {
                query = query.bind(key);
            }
            query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| TierError::Backend(e.to_string()))
        })
        .await?;

        let mut hit = std::collections::HashSet::with_capacity(rows.len());
        for row in &rows {
            let rendered_key = Self::column_text(row, "k")?;
            let text = Self::column_text(row, "v")?;
            if let Some(key) = by_rendered.get(&rendered_key) {
                found.insert(key.clone(), Self::decode(&text)?);
                hit.insert(rendered_key);
            }
        }

        Ok(keys
            .iter()
            .filter(|key| !hit.contains(&key.to_string()))
            .cloned()
            .collect())
    }

    async fn put(&self, key: &K, value: &V) -> Result<(), TierError> {
        let sql = self.upsert_sql();
        let key = key.to_string();
        let text = Self::encode(value)?;

        retry("sql_put", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(&key)
                .bind(&text)
                .execute(&self.pool)
                .await
                .map_err(|e| TierError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn put_batch(&self, values: &HashMap<K, V>) -> Result<(), TierError> {
        if values.is_empty() {
            return Ok(());
        }

        let sql = self.upsert_sql();
        let mut prepared = Vec::with_capacity(values.len());
        for (key, value) in values {
            prepared.push((key.to_string(), Self::encode(value)?));
        }

        retry("sql_put_batch", &RetryConfig::query(), || async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| TierError::Backend(e.to_string()))?;
            for (key, text) in &prepared {
                sqlx::query(&sql)
                    .bind(key)
                    .bind(text)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| TierError::Backend(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| TierError::Backend(e.to_string()))
        })
        .await
    }

    async fn delete(&self, key: &K) -> Result<(), TierError> {
        let sql = format!("DELETE FROM {} WHERE k = ?", self.table);
        let key = key.to_string();

        retry("sql_delete", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(&key)
                .execute(&self.pool)
                .await
                .map_err(|e| TierError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("kv_entries"));
        assert!(is_valid_table_name("Entries2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("kv entries"));
        assert!(!is_valid_table_name("kv;drop"));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let bytes = SqlTier::encode(&serde_json::json!({"a": 1})).unwrap();
        let back: serde_json::Value = SqlTier::decode(&bytes).unwrap();
        assert_eq!(back["a"], 1);
    }
}

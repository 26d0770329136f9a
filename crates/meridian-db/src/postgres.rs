//! Primary relational store backed by PostgreSQL.
//!
//! All collections share one table keyed by `(collection, natural_key)`.
//! Every statement is parameterised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime};
use meridian_common::{Attributes, Collection, EntityType};
use serde_json::Value;
use tokio_postgres::NoTls;
use tracing::info;

use crate::error::{DbError, Result};
use crate::schema::{StoredRecord, Violation, WriteOutcome, TABLE_RECORDS};
use crate::store::Store;

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS canonical_records (
        collection   TEXT        NOT NULL,
        natural_key  TEXT        NOT NULL,
        attributes   JSONB       NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (collection, natural_key)
    )";

// `xmax = 0` only holds for a freshly inserted row version.
const UPSERT: &str = "
    INSERT INTO canonical_records (collection, natural_key, attributes, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $4)
    ON CONFLICT (collection, natural_key) DO UPDATE
        SET attributes = EXCLUDED.attributes,
            updated_at = EXCLUDED.updated_at
    RETURNING (xmax = 0) AS inserted";

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    name: String,
}

impl PgStore {
    /// Build the pool and make sure the records table exists.
    pub async fn connect(url: &str, max_connections: usize) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let store = Self { pool, name: "postgres".to_string() };
        store.ensure_schema().await?;
        info!(table = TABLE_RECORDS, "PostgreSQL store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(CREATE_TABLE).await?;
        Ok(())
    }

    fn row_to_record(row: &tokio_postgres::Row) -> Result<StoredRecord> {
        let collection: String = row.try_get("collection")?;
        let attributes = match row.try_get::<_, Value>("attributes")? {
            Value::Object(map) => map,
            other => return Err(DbError::Malformed(format!("attributes is not an object: {other}"))),
        };
        Ok(StoredRecord {
            collection: collection
                .parse()
                .map_err(|e: meridian_common::MeridianError| DbError::Malformed(e.to_string()))?,
            natural_key: row.try_get("natural_key")?,
            attributes,
            created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
            updated_at: row.try_get::<_, DateTime<Utc>>("updated_at")?,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: Collection,
        natural_key: &str,
        attributes: &Attributes,
    ) -> Result<WriteOutcome> {
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(UPSERT).await?;
        let attrs = Value::Object(attributes.clone());
        let row = client
            .query_one(&stmt, &[&collection.as_str(), &natural_key, &attrs, &Utc::now()])
            .await?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted { WriteOutcome::Inserted } else { WriteOutcome::Updated })
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM canonical_records WHERE collection = $1",
                &[&collection.as_str()],
            )
            .await?;
        let n: i64 = row.try_get(0)?;
        Ok(n as u64)
    }

    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT collection, natural_key, attributes, created_at, updated_at
                 FROM canonical_records WHERE collection = $1 AND natural_key = $2",
                &[&collection.as_str(), &natural_key],
            )
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn check_foreign_keys(
        &self,
        entity_type: EntityType,
        refs: &[String],
    ) -> Result<Vec<Violation>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT natural_key FROM canonical_records
                 WHERE collection = $1 AND natural_key = ANY($2)",
                &[&entity_type.as_str(), &refs],
            )
            .await?;
        let found: std::collections::HashSet<String> = rows
            .iter()
            .map(|r| r.try_get::<_, String>(0))
            .collect::<std::result::Result<_, _>>()?;

        Ok(refs
            .iter()
            .filter(|k| !found.contains(k.as_str()))
            .map(|k| Violation {
                store: self.name.clone(),
                entity_type,
                natural_key: k.clone(),
            })
            .collect())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT collection, natural_key, attributes, created_at, updated_at
                 FROM canonical_records WHERE collection = $1 ORDER BY natural_key",
                &[&collection.as_str()],
            )
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }
}

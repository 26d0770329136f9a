//! Secondary embedded columnar store backed by LanceDB.

use std::collections::HashSet;
use std::path::Path;

use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;
use meridian_common::{Attributes, Collection, EntityType};
use tracing::info;

use crate::error::Result;
use crate::schema::{StoredRecord, Violation, WriteOutcome, TABLE_RECORDS};
use crate::schema_arrow::{batch_to_records, records_schema, records_to_batch};
use crate::store::Store;

/// Max keys per `IN (...)` filter.
const KEY_CHUNK: usize = 500;

#[derive(Clone)]
pub struct LanceStore {
    conn: Connection,
    path: String,
    name: String,
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl LanceStore {
    /// Open or create a database at the specified path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        if !path.as_ref().exists() {
            std::fs::create_dir_all(path.as_ref())?;
        }

        let conn = lancedb::connect(&path_str).execute().await?;
        let store = Self { conn, path: path_str, name: "lancedb".to_string() };

        let tables = store.conn.table_names().execute().await?;
        if !tables.iter().any(|t| t == TABLE_RECORDS) {
            let empty = RecordBatchIterator::new(vec![], records_schema());
            store.conn.create_table(TABLE_RECORDS, empty).execute().await?;
            info!(path = %store.path, "Created LanceDB records table");
        }
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn table(&self) -> Result<Table> {
        Ok(self.conn.open_table(TABLE_RECORDS).execute().await?)
    }

    async fn query(&self, filter: &str) -> Result<Vec<StoredRecord>> {
        let table = self.table().await?;
        let mut stream = table.query().only_if(filter).execute().await?;
        let mut out = Vec::new();
        while let Some(batch) = stream.next().await {
            out.extend(batch_to_records(&batch?)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for LanceStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        self.conn.table_names().execute().await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: Collection,
        natural_key: &str,
        attributes: &Attributes,
    ) -> Result<WriteOutcome> {
        let now = Utc::now();
        let existing = self.find_by_natural_key(collection, natural_key).await?;
        let created_at = existing.as_ref().map_or(now, |r| r.created_at);

        let record = StoredRecord {
            collection,
            natural_key: natural_key.to_string(),
            attributes: attributes.clone(),
            created_at,
            updated_at: now,
        };
        let batch = records_to_batch(std::slice::from_ref(&record))?;
        let schema = batch.schema();
        let iter = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = self.table().await?;
        let mut builder = table.merge_insert(&["collection", "natural_key"]);
        builder.when_matched_update_all(None).when_not_matched_insert_all();
        builder.execute(Box::new(iter)).await?;

        Ok(if existing.is_some() { WriteOutcome::Updated } else { WriteOutcome::Inserted })
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let table = self.table().await?;
        let n = table
            .count_rows(Some(format!("collection = {}", quote(collection.as_str()))))
            .await?;
        Ok(n as u64)
    }

    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>> {
        let filter = format!(
            "collection = {} AND natural_key = {}",
            quote(collection.as_str()),
            quote(natural_key)
        );
        Ok(self.query(&filter).await?.into_iter().next())
    }

    async fn check_foreign_keys(
        &self,
        entity_type: EntityType,
        refs: &[String],
    ) -> Result<Vec<Violation>> {
        let mut found = HashSet::new();
        for chunk in refs.chunks(KEY_CHUNK) {
            let list = chunk.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ");
            let filter = format!(
                "collection = {} AND natural_key IN ({list})",
                quote(entity_type.as_str())
            );
            found.extend(self.query(&filter).await?.into_iter().map(|r| r.natural_key));
        }
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
        self.query(&format!("collection = {}", quote(collection.as_str()))).await
    }
}

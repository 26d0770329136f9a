//! Embedded in-process store.
//!
//! Ordered map per collection, optionally persisted to a JSON snapshot file
//! so that state survives across runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use meridian_common::{Attributes, Collection, EntityType};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::schema::{StoredRecord, Violation, WriteOutcome};
use crate::store::Store;

type Collections = BTreeMap<Collection, BTreeMap<String, StoredRecord>>;

#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    data: RwLock<Collections>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(BTreeMap::new()),
            snapshot_path: None,
        }
    }

    /// Open a store backed by a snapshot file. A missing file starts empty.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut data = Collections::new();

        if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            let records: Vec<StoredRecord> = serde_json::from_slice(&bytes)?;
            let n = records.len();
            for r in records {
                data.entry(r.collection).or_default().insert(r.natural_key.clone(), r);
            }
            info!(path = %path.display(), records = n, "Loaded memory store snapshot");
        }

        Ok(Self {
            name: name.into(),
            data: RwLock::new(data),
            snapshot_path: Some(path),
        })
    }

    /// Write the snapshot file, if this store has one.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let records: Vec<StoredRecord> = {
            let data = self.data.read().await;
            data.values().flat_map(|c| c.values().cloned()).collect()
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&records)?).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), records = records.len(), "Flushed memory store snapshot");
        Ok(())
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(
        &self,
        collection: Collection,
        natural_key: &str,
        attributes: &Attributes,
    ) -> Result<WriteOutcome> {
        let now = Utc::now();
        let mut data = self.data.write().await;
        let rows = data.entry(collection).or_default();

        match rows.get_mut(natural_key) {
            Some(existing) => {
                existing.attributes = attributes.clone();
                existing.updated_at = now;
                Ok(WriteOutcome::Updated)
            }
            None => {
                rows.insert(
                    natural_key.to_string(),
                    StoredRecord {
                        collection,
                        natural_key: natural_key.to_string(),
                        attributes: attributes.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(WriteOutcome::Inserted)
            }
        }
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let data = self.data.read().await;
        Ok(data.get(&collection).map_or(0, |c| c.len() as u64))
    }

    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>> {
        let data = self.data.read().await;
        Ok(data.get(&collection).and_then(|c| c.get(natural_key)).cloned())
    }

    async fn check_foreign_keys(
        &self,
        entity_type: EntityType,
        refs: &[String],
    ) -> Result<Vec<Violation>> {
        let data = self.data.read().await;
        let rows = data.get(&Collection::Entity(entity_type));
        Ok(refs
            .iter()
            .filter(|k| !rows.is_some_and(|c| c.contains_key(k.as_str())))
            .map(|k| Violation {
                store: self.name.clone(),
                entity_type,
                natural_key: k.clone(),
            })
            .collect())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        let data = self.data.read().await;
        Ok(data
            .get(&collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }
}

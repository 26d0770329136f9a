//! Fault-injecting store decorator for tests.
//!
//! `FaultyStore` wraps any store and can simulate a lost connection after a
//! number of writes, an explicit disconnect, or constraint rejections for
//! specific natural keys.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use meridian_common::{Attributes, Collection, EntityType};

use crate::error::{DbError, Result};
use crate::schema::{StoredRecord, Violation, WriteOutcome};
use crate::store::Store;

pub struct FaultyStore {
    inner: Arc<dyn Store>,
    offline_after: Option<u64>,
    reject_keys: HashSet<String>,
    writes: AtomicU64,
    offline: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            offline_after: None,
            reject_keys: HashSet::new(),
            writes: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Go offline once `n` upserts have been accepted.
    pub fn offline_after(mut self, n: u64) -> Self {
        self.offline_after = Some(n);
        self
    }

    /// Reject upserts of these keys with a constraint violation.
    pub fn reject_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reject_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable(format!("{}: connection lost", self.inner.name())));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FaultyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()?;
        self.inner.ping().await
    }

    async fn upsert(
        &self,
        collection: Collection,
        natural_key: &str,
        attributes: &Attributes,
    ) -> Result<WriteOutcome> {
        if let Some(limit) = self.offline_after {
            if self.writes.load(Ordering::SeqCst) >= limit {
                self.set_offline(true);
            }
        }
        self.check_online()?;

        if self.reject_keys.contains(natural_key) {
            return Err(DbError::Constraint(format!("check constraint rejected {natural_key}")));
        }

        let outcome = self.inner.upsert(collection, natural_key, attributes).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        self.check_online()?;
        self.inner.count(collection).await
    }

    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>> {
        self.check_online()?;
        self.inner.find_by_natural_key(collection, natural_key).await
    }

    async fn check_foreign_keys(
        &self,
        entity_type: EntityType,
        refs: &[String],
    ) -> Result<Vec<Violation>> {
        self.check_online()?;
        self.inner.check_foreign_keys(entity_type, refs).await
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        self.check_online()?;
        self.inner.scan(collection).await
    }
}

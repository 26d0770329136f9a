//! Stand-ins for a store that is not configured, or could not be opened.

use async_trait::async_trait;
use meridian_common::{Attributes, Collection, EntityType};

use crate::error::{DbError, Result};
use crate::schema::{StoredRecord, Violation, WriteOutcome};
use crate::store::Store;

/// Accepts every write as `Skipped` and reports itself empty.
#[derive(Debug, Clone)]
pub struct DisabledStore {
    name: String,
}

impl DisabledStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for DisabledStore {
    fn default() -> Self {
        Self::new("disabled")
    }
}

#[async_trait]
impl Store for DisabledStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _: Collection, _: &str, _: &Attributes) -> Result<WriteOutcome> {
        Ok(WriteOutcome::Skipped("store disabled".to_string()))
    }

    async fn count(&self, _: Collection) -> Result<u64> {
        Ok(0)
    }

    async fn find_by_natural_key(&self, _: Collection, _: &str) -> Result<Option<StoredRecord>> {
        Ok(None)
    }

    async fn check_foreign_keys(
        &self,
        entity_type: EntityType,
        refs: &[String],
    ) -> Result<Vec<Violation>> {
        Ok(refs
            .iter()
            .map(|k| Violation {
                store: self.name.clone(),
                entity_type,
                natural_key: k.clone(),
            })
            .collect())
    }

    async fn scan(&self, _: Collection) -> Result<Vec<StoredRecord>> {
        Ok(Vec::new())
    }
}

/// A configured store that failed to open. Every call fails as unavailable,
/// so the run degrades to the other store instead of aborting.
#[derive(Debug, Clone)]
pub struct UnreachableStore {
    name: String,
    reason: String,
}

impl UnreachableStore {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { name: name.into(), reason: reason.into() }
    }

    fn err(&self) -> DbError {
        DbError::Unavailable(format!("{}: {}", self.name, self.reason))
    }
}

#[async_trait]
impl Store for UnreachableStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        Err(self.err())
    }

    async fn upsert(&self, _: Collection, _: &str, _: &Attributes) -> Result<WriteOutcome> {
        Err(self.err())
    }

    async fn count(&self, _: Collection) -> Result<u64> {
        Err(self.err())
    }

    async fn find_by_natural_key(&self, _: Collection, _: &str) -> Result<Option<StoredRecord>> {
        Err(self.err())
    }

    async fn check_foreign_keys(&self, _: EntityType, _: &[String]) -> Result<Vec<Violation>> {
        Err(self.err())
    }

    async fn scan(&self, _: Collection) -> Result<Vec<StoredRecord>> {
        Err(self.err())
    }
}

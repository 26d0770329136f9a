//! The `Store` abstraction.
//!
//! Every backend (relational, embedded, in-memory, disabled) implements this
//! trait once. The loader and validator only ever talk to a `dyn Store`, so
//! no component reaches a process-global client.
//!
//! Contract:
//! - `upsert` keyed by `(collection, natural_key)`: an existing key yields
//!   `Updated`, a new key `Inserted`. A key conflict is never an error.
//! - `count`, `find_by_natural_key`, `check_foreign_keys` and `scan` are
//!   read-only.
//! - A lost connection surfaces as `DbError::Unavailable`.

use async_trait::async_trait;
use meridian_common::{Attributes, Collection, EntityType};

use crate::error::Result;
use crate::schema::{StoredRecord, Violation, WriteOutcome};

#[async_trait]
pub trait Store: Send + Sync {
    /// Human-readable backend name used in results and logs.
    fn name(&self) -> &str;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Insert or update one record keyed by `(collection, natural_key)`.
    async fn upsert(
        &self,
        collection: Collection,
        natural_key: &str,
        attributes: &Attributes,
    ) -> Result<WriteOutcome>;

    async fn count(&self, collection: Collection) -> Result<u64>;

    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>>;

    /// Return one violation per reference that does not exist in this store.
    async fn check_foreign_keys(
        &self,
        entity_type: EntityType,
        refs: &[String],
    ) -> Result<Vec<Violation>>;

    /// Every row of a collection, duplicates included if the backend allows them.
    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>>;

    /// Natural keys of a collection.
    async fn keys(&self, collection: Collection) -> Result<Vec<String>> {
        Ok(self
            .scan(collection)
            .await?
            .into_iter()
            .map(|r| r.natural_key)
            .collect())
    }
}

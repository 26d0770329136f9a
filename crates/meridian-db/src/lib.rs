//! Meridian storage layer.
//!
//! Defines the `Store` abstraction, its backends, the lease-based store
//! handles, and the dual-store loader that writes every batch to a primary
//! and a secondary store without a cross-store transaction.
//!
//! # Backends
//!
//! - `PgStore`: PostgreSQL via a deadpool connection pool (feature `postgres`)
//! - `LanceStore`: embedded LanceDB table (feature `lance`)
//! - `MemoryStore`: in-process map with an optional JSON snapshot
//! - `DisabledStore`: stands in for an unconfigured store
//! - `UnreachableStore`: stands in for a configured store that failed to open
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meridian_common::{CanonicalEntity, EntityType, LoadBatch};
//! use meridian_db::{DualStoreLoader, LoaderConfig, MemoryStore, StoreSet};
//!
//! # async fn run(entities: Vec<CanonicalEntity>) {
//! let stores = StoreSet::new(
//!     Arc::new(MemoryStore::new("primary")),
//!     Arc::new(MemoryStore::new("secondary")),
//! );
//! let loader = DualStoreLoader::new(stores, LoaderConfig::default());
//! let (primary, secondary) = loader
//!     .load_batch(&LoadBatch::new(EntityType::Disease, entities))
//!     .await;
//! # }
//! ```

pub mod disabled;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fakes;
pub mod loader;
pub mod memory;
pub mod pool;
pub mod schema;
pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "lance")]
pub mod lance;
#[cfg(feature = "lance")]
pub mod schema_arrow;

pub use disabled::{DisabledStore, UnreachableStore};
pub use error::{DbError, Result};
pub use loader::{DualStoreLoader, LoadProgress, LoadProgressSnapshot, LoaderConfig, ProgressCallback};
pub use memory::MemoryStore;
pub use pool::{StoreHandle, StoreLease, StoreSet};
pub use schema::{StoreRole, StoreWriteResult, StoredRecord, Violation, WriteOutcome};
pub use store::Store;

#[cfg(feature = "postgres")]
pub use postgres::PgStore;


#[cfg(feature = "lance")]
pub use lance::LanceStore;

#[cfg(test)]
mod tests;

//! Store-level record and result types.

use chrono::{DateTime, Utc};
use meridian_common::{Attributes, CanonicalEntity, Collection, EntityType, ErrorKind, RecordError};
use serde::{Deserialize, Serialize};

/// Name of the single relational table backing every collection.
pub const TABLE_RECORDS: &str = "canonical_records";

/// Outcome of one upsert against one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// The natural key already existed. This is the idempotent path, never an error.
    Updated,
    Skipped(String),
    Error(ErrorKind),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Inserted | WriteOutcome::Updated)
    }
}

/// A row as held by a store, whatever its physical layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub collection: Collection,
    pub natural_key: String,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn into_entity(self) -> Option<CanonicalEntity> {
        let entity_type = self.collection.entity_type()?;
        Some(CanonicalEntity {
            natural_key: self.natural_key,
            entity_type,
            attributes: self.attributes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A reference that could not be resolved in a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub store: String,
    pub entity_type: EntityType,
    pub natural_key: String,
}

/// Which of the two stores a handle plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    Primary,
    Secondary,
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Primary   => "primary",
            StoreRole::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of writing one batch (or several, merged) to one store.
///
/// `succeeded` counts inserts and updates. Skipped records are neither
/// succeeded nor failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreWriteResult {
    pub store: String,
    pub succeeded: u64,
    pub failed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<RecordError>,
}

impl StoreWriteResult {
    pub fn new(store: impl Into<String>) -> Self {
        Self { store: store.into(), ..Default::default() }
    }

    pub fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted => {
                self.inserted += 1;
                self.succeeded += 1;
            }
            WriteOutcome::Updated => {
                self.updated += 1;
                self.succeeded += 1;
            }
            WriteOutcome::Skipped(_) => self.skipped += 1,
            WriteOutcome::Error(_) => self.failed += 1,
        }
    }

    pub fn attempted(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Fold another result for the same store into this one.
    pub fn merge(&mut self, other: StoreWriteResult) {
        if self.store.is_empty() {
            self.store = other.store;
        }
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tallies() {
        let mut r = StoreWriteResult::new("memory");
        r.record(&WriteOutcome::Inserted);
        r.record(&WriteOutcome::Updated);
        r.record(&WriteOutcome::Skipped("store disabled".into()));
        r.record(&WriteOutcome::Error(ErrorKind::ConstraintViolation));
        assert_eq!((r.succeeded, r.failed, r.skipped), (2, 1, 1));
        assert_eq!(r.attempted(), 3);
    }

    #[test]
    fn test_merge() {
        let mut a = StoreWriteResult::new("pg");
        a.record(&WriteOutcome::Inserted);
        let mut b = StoreWriteResult::new("pg");
        b.record(&WriteOutcome::Updated);
        b.errors.push(RecordError::new(Some("OMIM:1"), ErrorKind::Malformed, "bad"));
        a.merge(b);
        assert_eq!(a.succeeded, 2);
        assert_eq!(a.errors.len(), 1);
    }
}

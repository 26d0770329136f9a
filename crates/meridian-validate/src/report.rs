//! Validation report types. Immutable once produced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meridian_common::{Association, EntityType};
use serde::{Deserialize, Serialize};

/// Count comparison for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSync {
    pub primary_count: u64,
    pub secondary_count: u64,
    pub divergence: u64,
}

impl CollectionSync {
    pub fn new(primary_count: u64, secondary_count: u64) -> Self {
        Self {
            primary_count,
            secondary_count,
            divergence: primary_count.abs_diff(secondary_count),
        }
    }
}

/// An association with at least one endpoint missing from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferentialViolation {
    pub association: Association,
    pub store: String,
    /// `(entity_type, natural_key)` of every missing endpoint.
    pub missing: Vec<(EntityType, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateKey,
    MissingRequired { field: String },
    InvalidIdentifier,
    /// A stored association whose attributes cannot be read back.
    MalformedAssociation,
    StoreUnreadable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub store: String,
    pub collection: String,
    pub natural_key: Option<String>,
    #[serde(flatten)]
    pub kind: IssueKind,
    pub detail: String,
}

/// Write totals across both stores, for the completeness axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTotals {
    pub attempted: u64,
    pub succeeded: u64,
}

impl LoadTotals {
    pub fn add(&mut self, attempted: u64, succeeded: u64) {
        self.attempted += attempted;
        self.succeeded += succeeded;
    }
}

/// Per-axis points, each in `[0, 25]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub sync: f64,
    pub referential: f64,
    pub consistency: f64,
    pub completeness: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        (self.sync + self.referential + self.consistency + self.completeness).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Keyed by collection name, `association` included.
    pub per_entity_type: BTreeMap<String, CollectionSync>,
    pub referential_violations: Vec<ReferentialViolation>,
    pub consistency_issues: Vec<Issue>,
    pub associations_checked: u64,
    pub records_scanned: u64,
    pub load_totals: LoadTotals,
    pub score: ScoreBreakdown,
    pub quality_score: f64,
    /// Checks not run because the run was cancelled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_checks: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn total_divergence(&self) -> u64 {
        self.per_entity_type.values().map(|s| s.divergence).sum()
    }

    pub fn divergence_for(&self, collection: &str) -> u64 {
        self.per_entity_type.get(collection).map_or(0, |s| s.divergence)
    }

    /// No divergence, no violations, no issues.
    pub fn is_clean(&self) -> bool {
        self.total_divergence() == 0
            && self.referential_violations.is_empty()
            && self.consistency_issues.is_empty()
            && self.skipped_checks.is_empty()
    }
}

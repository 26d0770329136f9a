//! meridian-validate: Post-load reconciliation between the two stores.
//!
//! Compares per-collection counts, checks that every stored association
//! resolves in both stores, scans for duplicate keys, missing required
//! fields and malformed identifiers, and folds the findings into a 0–100
//! quality score.

pub mod report;
pub mod score;
pub mod validator;

pub use report::{
    CollectionSync, Issue, IssueKind, LoadTotals, ReferentialViolation, ScoreBreakdown,
    ValidationReport,
};
pub use score::{compute_score, ScoreInputs, AXIS_POINTS};
pub use validator::Validator;

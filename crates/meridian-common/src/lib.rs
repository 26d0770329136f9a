//! meridian-common: Shared types, errors, and configuration used across all Meridian crates.

pub mod error;
pub mod entities;
pub mod confidence;
pub mod run_config;

// Re-export commonly used types
pub use error::{ErrorKind, MeridianError, RecordError, Result};
pub use entities::{
    Association, Attributes, CanonicalEntity, Collection, EntityType, LoadBatch, Loadable,
    SourceRecord,
};
pub use run_config::{AssociationPlan, PolicySpec, RetryPolicy, RunConfig, SourceSettings};

//! meridian-kg: Association building between canonical entities.
//!
//! Associations come from curated cross-reference tables or, when none
//! exist, from deterministic heuristic pairing tagged with a low confidence.
//! They are loaded through the same dual-store upsert path as entities.

pub mod builder;
pub mod error;
pub mod heuristic;
pub mod load;
pub mod mapping;
pub mod policy;

pub use builder::{AssociationBuilder, AssociationStream, BuildStats, PairRequest};
pub use error::{KgError, Result};
pub use heuristic::HeuristicStrategy;
pub use load::{load_associations, AssociationLoad};
pub use mapping::{CuratedMapping, CuratedRow, MergedRow};
pub use policy::{default_relation, MappingPolicy};

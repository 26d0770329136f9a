//! Mapping policies and conventional relation names.

use meridian_common::{EntityType, PolicySpec};

use crate::error::Result;
use crate::heuristic::HeuristicStrategy;
use crate::mapping::CuratedMapping;

#[derive(Debug, Clone, PartialEq)]
pub enum MappingPolicy {
    Curated(CuratedMapping),
    Heuristic(HeuristicStrategy),
}

impl MappingPolicy {
    /// Build a policy from its configuration, reading curated files from disk.
    pub async fn from_spec(spec: &PolicySpec) -> Result<Self> {
        Ok(match spec {
            PolicySpec::Curated { path }       => MappingPolicy::Curated(CuratedMapping::load(path).await?),
            PolicySpec::RoundRobin             => MappingPolicy::Heuristic(HeuristicStrategy::RoundRobin),
            PolicySpec::HashBucket { fanout }  => {
                MappingPolicy::Heuristic(HeuristicStrategy::HashBucket { fanout: *fanout })
            }
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MappingPolicy::Curated(_)  => "curated",
            MappingPolicy::Heuristic(s) => s.name(),
        }
    }
}

/// Relation used when a plan does not name one.
pub fn default_relation(from: EntityType, to: EntityType) -> &'static str {
    use EntityType::*;
    match (from, to) {
        (Phenotype, Disease)   => "phenotype_of",
        (Gene, Disease)        => "associated_with",
        (Drug, Disease)        => "treats",
        (Drug, Gene)           => "targets",
        (Publication, Gene)    => "mentions",
        (Publication, Disease) => "mentions",
        _                      => "related_to",
    }
}

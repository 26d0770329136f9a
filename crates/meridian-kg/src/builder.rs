//! Association builder.
//!
//! Endpoints are resolved once per pair: a key is eligible only if every
//! available store holds it, so anything emitted here satisfies referential
//! closure once loaded. Associations themselves are produced lazily.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use meridian_common::confidence::EvidenceKind;
use meridian_common::{Association, Collection, EntityType};
use meridian_db::StoreSet;
use tracing::{debug, info, instrument, warn};

use crate::error::{KgError, Result};
use crate::heuristic::HeuristicStrategy;
use crate::policy::{default_relation, MappingPolicy};

/// Counters known once a pair has been planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Curated rows whose endpoints are not present in the stores.
    pub unresolved: u64,
    /// Associations the stream will yield.
    pub planned: u64,
    /// Set when a curated policy fell back to heuristic pairing.
    pub fallback_used: bool,
    pub policy: String,
}

pub struct AssociationStream {
    pub stream: BoxStream<'static, Association>,
    pub stats: BuildStats,
}

impl std::fmt::Debug for AssociationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationStream").field("stats", &self.stats).finish()
    }
}

/// One pair to build, as requested by a run.
#[derive(Debug, Clone)]
pub struct PairRequest {
    pub from: EntityType,
    pub to: EntityType,
    pub relation: Option<String>,
    pub policy: MappingPolicy,
    pub fallback_heuristic: bool,
}

impl PairRequest {
    pub fn relation(&self) -> String {
        self.relation
            .clone()
            .unwrap_or_else(|| default_relation(self.from, self.to).to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AssociationBuilder {
    stores: StoreSet,
    fallback_strategy: HeuristicStrategy,
}

impl AssociationBuilder {
    pub fn new(stores: StoreSet) -> Self {
        Self {
            stores,
            fallback_strategy: HeuristicStrategy::RoundRobin,
        }
    }

    /// Strategy used when a curated plan falls back to heuristics.
    pub fn with_fallback_strategy(mut self, strategy: HeuristicStrategy) -> Self {
        self.fallback_strategy = strategy;
        self
    }

    /// Keys of `entity_type` held by every available store.
    #[instrument(skip(self))]
    pub async fn resolve_endpoints(&self, entity_type: EntityType) -> Result<BTreeSet<String>> {
        let mut resolved: Option<BTreeSet<String>> = None;
        for handle in self.stores.handles() {
            if !handle.is_available() {
                debug!(store = handle.name(), "Skipping unavailable store for endpoint resolution");
                continue;
            }
            let keys: BTreeSet<String> = {
                let lease = handle.acquire().await?;
                lease.keys(Collection::Entity(entity_type)).await?.into_iter().collect()
            };
            resolved = Some(match resolved {
                Some(acc) => acc.intersection(&keys).cloned().collect(),
                None => keys,
            });
        }
        resolved.ok_or(KgError::NoStores)
    }

    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to, policy = request.policy.label()))]
    pub async fn build(&self, request: &PairRequest) -> Result<AssociationStream> {
        let from_keys = self.resolve_endpoints(request.from).await?;
        let to_keys = self.resolve_endpoints(request.to).await?;
        let relation = request.relation();

        let (stream, stats) = match &request.policy {
            MappingPolicy::Curated(mapping) => {
                let merged = mapping.merged(&relation);
                let (resolved, unresolved): (Vec<_>, Vec<_>) = merged
                    .into_iter()
                    .partition(|r| from_keys.contains(&r.from_key) && to_keys.contains(&r.to_key));

                if !unresolved.is_empty() {
                    warn!(unresolved = unresolved.len(), "Curated rows reference entities missing from the stores");
                }

                if resolved.is_empty() && request.fallback_heuristic {
                    info!(strategy = self.fallback_strategy.name(), "No curated row resolved, falling back to heuristic pairing");
                    let (stream, planned) =
                        self.heuristic(request, self.fallback_strategy, &relation, from_keys, to_keys);
                    let stats = BuildStats {
                        unresolved: unresolved.len() as u64,
                        planned,
                        fallback_used: true,
                        policy: self.fallback_strategy.name().to_string(),
                    };
                    (stream, stats)
                } else {
                    let (from, to) = (request.from, request.to);
                    let planned = resolved.len() as u64;
                    let stream = stream::iter(resolved.into_iter().map(move |row| Association {
                        from_key: row.from_key,
                        from_type: from,
                        to_key: row.to_key,
                        to_type: to,
                        relation_type: row.relation,
                        evidence: row.evidence,
                        confidence: row.confidence,
                    }))
                    .boxed();
                    let stats = BuildStats {
                        unresolved: unresolved.len() as u64,
                        planned,
                        fallback_used: false,
                        policy: "curated".into(),
                    };
                    (stream, stats)
                }
            }
            MappingPolicy::Heuristic(strategy) => {
                let (stream, planned) = self.heuristic(request, *strategy, &relation, from_keys, to_keys);
                let stats = BuildStats {
                    unresolved: 0,
                    planned,
                    fallback_used: false,
                    policy: strategy.name().to_string(),
                };
                (stream, stats)
            }
        };

        info!(planned = stats.planned, unresolved = stats.unresolved, "Association pair planned");
        Ok(AssociationStream { stream, stats })
    }

    fn heuristic(
        &self,
        request: &PairRequest,
        strategy: HeuristicStrategy,
        relation: &str,
        from_keys: BTreeSet<String>,
        to_keys: BTreeSet<String>,
    ) -> (BoxStream<'static, Association>, u64) {
        let planned: usize = match strategy {
            _ if to_keys.is_empty()                  => 0,
            HeuristicStrategy::RoundRobin            => from_keys.len(),
            HeuristicStrategy::HashBucket { fanout } => from_keys.len() * fanout.clamp(1, to_keys.len()),
        };

        let from_keys = Arc::new(from_keys.into_iter().collect::<Vec<_>>());
        let to_keys = Arc::new(to_keys.into_iter().collect::<Vec<_>>());
        let (from, to) = (request.from, request.to);
        let relation = relation.to_string();
        let evidence = strategy.evidence();
        let confidence = EvidenceKind::HeuristicAssignment.base_weight();

        let stream = stream::iter(strategy.pairs(from_keys, to_keys).map(move |(f, t)| Association {
            from_key: f,
            from_type: from,
            to_key: t,
            to_type: to,
            relation_type: relation.clone(),
            evidence: evidence.clone(),
            confidence,
        }))
        .boxed();
        (stream, planned as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{CuratedMapping, CuratedRow};
    use meridian_common::Attributes;
    use meridian_db::{MemoryStore, Store};
    use std::sync::Arc;

    async fn seeded(keys: &[(EntityType, &str)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new("m"));
        for (t, k) in keys {
            store.upsert(Collection::Entity(*t), k, &Attributes::new()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_endpoints_are_intersection_of_stores() {
        let a = seeded(&[(EntityType::Gene, "HGNC:1"), (EntityType::Gene, "HGNC:2")]).await;
        let b = seeded(&[(EntityType::Gene, "HGNC:2"), (EntityType::Gene, "HGNC:3")]).await;
        let builder = AssociationBuilder::new(StoreSet::new(a, b));
        let keys = builder.resolve_endpoints(EntityType::Gene).await.unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["HGNC:2".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_ignored_for_resolution() {
        let a = seeded(&[(EntityType::Gene, "HGNC:1")]).await;
        let b = Arc::new(MemoryStore::new("empty"));
        let stores = StoreSet::new(a, b);
        stores.secondary.mark_unavailable("test");
        let keys = AssociationBuilder::new(stores).resolve_endpoints(EntityType::Gene).await.unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn test_curated_counts_unresolved_and_falls_back() {
        let keys = [(EntityType::Drug, "CHEMBL1"), (EntityType::Gene, "HGNC:1")];
        let stores = StoreSet::new(seeded(&keys).await, seeded(&keys).await);
        let mapping = CuratedMapping::new(vec![CuratedRow::new("CHEMBL9", "HGNC:1")]);

        let mut request = PairRequest {
            from: EntityType::Drug,
            to: EntityType::Gene,
            relation: None,
            policy: MappingPolicy::Curated(mapping),
            fallback_heuristic: false,
        };
        let builder = AssociationBuilder::new(stores);
        let built = builder.build(&request).await.unwrap();
        assert_eq!(built.stats.unresolved, 1);
        assert_eq!(built.stream.count().await, 0);

        request.fallback_heuristic = true;
        let built = builder.build(&request).await.unwrap();
        assert!(built.stats.fallback_used);
        let assocs: Vec<_> = built.stream.collect().await;
        assert_eq!(assocs.len(), 1);
        assert_eq!(assocs[0].relation_type, "targets");
        assert_eq!(assocs[0].evidence, "heuristic:round_robin");
        assert!(assocs[0].confidence < 0.9);
    }
}

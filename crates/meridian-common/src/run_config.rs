//! Run configuration for a single pipeline invocation.
//!
//! Every field carries a serde default so a partial `[run]` section works.
//! `RunConfig::validate` must be called before any I/O happens; every
//! problem it finds is a `FatalConfig` error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::entities::EntityType;
use crate::error::{MeridianError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
    /// Per-type override of `default_target_count`.
    #[serde(default)]
    pub target_count_per_type: BTreeMap<String, usize>,
    #[serde(default = "default_target_count")]
    pub default_target_count: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Upper bound on concurrent entity-type workers.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Records per `LoadBatch` submitted to the loader.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Records per store sub-batch inside the loader.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub associations: Vec<AssociationPlan>,
}

fn default_entity_types() -> Vec<String> {
    EntityType::ALL.iter().map(|t| t.as_str().to_string()).collect()
}
fn default_target_count()      -> usize { 100 }
fn default_parallelism()       -> usize { 4 }
fn default_batch_size()        -> usize { 1000 }
fn default_chunk_size()        -> usize { 500 }
fn default_progress_interval() -> u64   { 100 }

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            entity_types: default_entity_types(),
            target_count_per_type: BTreeMap::new(),
            default_target_count: default_target_count(),
            seed: None,
            parallelism: default_parallelism(),
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            progress_interval: default_progress_interval(),
            source: SourceSettings::default(),
            associations: Vec::new(),
        }
    }
}

/// Settings shared by every source adapter in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// When absent, records are generated deterministically from the seed.
    #[serde(default)]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub rate_limit_ms: u64,
    /// Fraction of synthetic records that repeat an earlier natural key.
    #[serde(default)]
    pub duplicate_rate: f64,
    /// Fraction of synthetic records emitted without their key field.
    #[serde(default)]
    pub malformed_rate: f64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_page_size()            -> usize { 200 }
fn default_request_timeout_secs() -> u64   { 30 }

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            source_uri: None,
            rate_limit_ms: 0,
            duplicate_rate: 0.0,
            malformed_rate: 0.0,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff: delay before attempt `n + 1` is `base * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts()  -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        std::time::Duration::from_millis(self.base_delay_ms.saturating_mul(2u64.pow(exp)))
    }
}

/// One association-generation step, run after all entity loading finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationPlan {
    pub from: String,
    pub to: String,
    /// Defaults to the conventional relation for the pair.
    #[serde(default)]
    pub relation: Option<String>,
    pub policy: PolicySpec,
    /// Curated only: emit heuristic pairs when no curated row resolved.
    #[serde(default)]
    pub fallback_heuristic: bool,
}

impl AssociationPlan {
    pub fn from_type(&self) -> Result<EntityType> {
        self.from.parse()
    }

    pub fn to_type(&self) -> Result<EntityType> {
        self.to.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    /// TSV file of curated cross-references.
    Curated { path: PathBuf },
    RoundRobin,
    HashBucket {
        #[serde(default = "default_fanout")]
        fanout: usize,
    },
}

fn default_fanout() -> usize { 1 }

impl RunConfig {
    /// Parse the configured type names, in order.
    pub fn resolve_entity_types(&self) -> Result<Vec<EntityType>> {
        self.entity_types.iter().map(|s| s.parse()).collect()
    }

    /// Keys are matched the way type names are parsed, so "Gene" and
    /// "literature" count as gene and publication.
    pub fn target_count_for(&self, entity_type: EntityType) -> usize {
        self.target_count_per_type
            .iter()
            .find(|(name, _)| name.parse::<EntityType>().is_ok_and(|t| t == entity_type))
            .map(|(_, n)| *n)
            .unwrap_or(self.default_target_count)
    }

    /// Number of concurrent entity-type workers for this run.
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.min(self.entity_types.len()).max(1)
    }

    /// Check the whole configuration and return the resolved entity types.
    pub fn validate(&self) -> Result<Vec<EntityType>> {
        if self.entity_types.is_empty() {
            return Err(fatal("no entity types configured"));
        }
        let types = self.resolve_entity_types()?;

        let mut seen = BTreeSet::new();
        for t in &types {
            if !seen.insert(*t) {
                return Err(fatal(format!("entity type listed twice: {t}")));
            }
        }

        if self.parallelism == 0 {
            return Err(fatal("parallelism must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(fatal("batch_size must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(fatal("chunk_size must be at least 1"));
        }

        let mut counted = BTreeSet::new();
        for name in self.target_count_per_type.keys() {
            let t: EntityType = name.parse()?;
            if !seen.contains(&t) {
                return Err(fatal(format!("target count given for type not in run: {t}")));
            }
            if !counted.insert(t) {
                return Err(fatal(format!("target count given twice for {t}")));
            }
        }

        let src = &self.source;
        for (label, rate) in [("duplicate_rate", src.duplicate_rate), ("malformed_rate", src.malformed_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(fatal(format!("{label} must be within [0, 1], got {rate}")));
            }
        }
        if src.duplicate_rate + src.malformed_rate > 1.0 {
            return Err(fatal("duplicate_rate + malformed_rate exceeds 1"));
        }
        if src.page_size == 0 {
            return Err(fatal("source.page_size must be at least 1"));
        }
        if src.retry.max_attempts == 0 {
            return Err(fatal("source.retry.max_attempts must be at least 1"));
        }
        if let Some(uri) = &src.source_uri {
            if !(uri.starts_with("http://") || uri.starts_with("https://")) {
                return Err(fatal(format!("unsupported source_uri scheme: {uri}")));
            }
        }

        for plan in &self.associations {
            let (from, to) = (plan.from_type()?, plan.to_type()?);
            if from == to {
                return Err(fatal(format!("association plan pairs {from} with itself")));
            }
            for t in [from, to] {
                if !seen.contains(&t) {
                    return Err(fatal(format!(
                        "association plan {from}->{to} references type not in run: {t}"
                    )));
                }
            }
            if let PolicySpec::HashBucket { fanout: 0 } = plan.policy {
                return Err(fatal(format!("association plan {from}->{to}: fanout must be at least 1")));
            }
            if plan.fallback_heuristic && !matches!(plan.policy, PolicySpec::Curated { .. }) {
                return Err(fatal(format!(
                    "association plan {from}->{to}: fallback_heuristic only applies to curated policies"
                )));
            }
        }

        Ok(types)
    }
}

fn fatal(msg: impl Into<String>) -> MeridianError {
    MeridianError::FatalConfig(msg.into())
}

//! Curated cross-reference tables.
//!
//! File format (TSV, `#` starts a comment, optional header row):
//!
//! ```text
//! from_key    to_key    relation    evidence    confidence
//! HP:0001166  OMIM:154700  phenotype_of  orphanet  0.95
//! ```
//!
//! Only the first two columns are required. A missing confidence takes the
//! curated base weight; a missing relation takes the plan's relation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use meridian_common::confidence::{aggregate_confidence, clamp_confidence, EvidenceKind};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{KgError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct CuratedRow {
    pub from_key: String,
    pub to_key: String,
    pub relation: Option<String>,
    pub evidence: Option<String>,
    pub confidence: Option<f64>,
}

impl CuratedRow {
    pub fn new(from_key: impl Into<String>, to_key: impl Into<String>) -> Self {
        Self {
            from_key: from_key.into(),
            to_key: to_key.into(),
            relation: None,
            evidence: None,
            confidence: None,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>, confidence: f64) -> Self {
        self.evidence = Some(evidence.into());
        self.confidence = Some(confidence);
        self
    }
}

/// One `(from, to, relation)` triple after merging all rows that name it.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub from_key: String,
    pub to_key: String,
    pub relation: String,
    /// Distinct evidence labels, sorted, joined with `;`.
    pub evidence: String,
    pub confidence: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CuratedMapping {
    rows: Vec<CuratedRow>,
    digest: Option<String>,
}

impl CuratedMapping {
    pub fn new(rows: Vec<CuratedRow>) -> Self {
        Self { rows, digest: None }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let text = String::from_utf8(bytes).map_err(|e| KgError::Mapping {
            line: 0,
            message: format!("not valid UTF-8: {e}"),
        })?;
        let mapping = Self::from_tsv(&text)?;
        debug!(
            path = %path.as_ref().display(),
            rows = mapping.len(),
            digest = mapping.digest().unwrap_or_default(),
            "Loaded curated mapping"
        );
        Ok(mapping)
    }

    pub fn from_tsv(text: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
            if rows.is_empty() && cols[0].eq_ignore_ascii_case("from_key") {
                continue;
            }
            if cols.len() < 2 || cols[0].is_empty() || cols[1].is_empty() {
                return Err(KgError::Mapping {
                    line: line_no,
                    message: "expected at least from_key and to_key".into(),
                });
            }

            let optional = |i: usize| cols.get(i).filter(|c| !c.is_empty()).map(|c| c.to_string());
            let confidence = match optional(4) {
                Some(c) => Some(c.parse::<f64>().map_err(|_| KgError::Mapping {
                    line: line_no,
                    message: format!("invalid confidence `{c}`"),
                })?),
                None => None,
            };

            rows.push(CuratedRow {
                from_key: cols[0].to_uppercase(),
                to_key: cols[1].to_uppercase(),
                relation: optional(2),
                evidence: optional(3),
                confidence,
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Ok(Self {
            rows,
            digest: Some(hex::encode(hasher.finalize())),
        })
    }

    pub fn push(&mut self, row: CuratedRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// SHA-256 of the source file, when loaded from text.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Merge rows per `(from, to, relation)` with the noisy-OR of their confidences.
    /// Output is sorted by `(from, relation, to)`.
    pub fn merged(&self, default_relation: &str) -> Vec<MergedRow> {
        let mut groups: BTreeMap<(String, String, String), (Vec<f64>, BTreeSet<String>)> =
            BTreeMap::new();

        for row in &self.rows {
            let relation = row.relation.clone().unwrap_or_else(|| default_relation.to_string());
            let entry = groups
                .entry((row.from_key.clone(), relation, row.to_key.clone()))
                .or_default();
            entry.0.push(clamp_confidence(
                row.confidence.unwrap_or(EvidenceKind::CuratedMapping.base_weight()),
            ));
            entry.1.insert(
                row.evidence
                    .clone()
                    .unwrap_or_else(|| EvidenceKind::CuratedMapping.as_str().to_string()),
            );
        }

        groups
            .into_iter()
            .map(|((from_key, relation, to_key), (confidences, evidence))| MergedRow {
                from_key,
                to_key,
                relation,
                evidence: evidence.into_iter().collect::<Vec<_>>().join(";"),
                confidence: aggregate_confidence(&confidences),
                support: confidences.len(),
            })
            .collect()
    }
}

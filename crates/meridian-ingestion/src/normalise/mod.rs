//! Record transformation: raw `SourceRecord` → `CanonicalEntity`.
//!
//! Steps, per record:
//!   1. derive the natural key from the type's key spec and check its format
//!   2. coerce every ruled field, applying defaults where defined
//!   3. compute derived fields (normalised names, cross-reference URLs, ...)
//!
//! A record without a usable key or missing a required field yields a
//! `TransformError`; it is dropped and counted, never fatal.

pub mod coerce;
pub mod rules;

use std::collections::HashMap;

use meridian_common::{Attributes, CanonicalEntity, EntityType, SourceRecord};
use serde_json::{json, Value};
use tracing::trace;

use crate::error::TransformError;
pub use rules::{rules_for, FieldKind, FieldRule, KeySpec, TypeRules};

#[derive(Debug, Clone)]
pub struct Transformer {
    rules: HashMap<EntityType, TypeRules>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self {
            rules: EntityType::ALL.iter().map(|t| (*t, rules_for(*t))).collect(),
        }
    }

    pub fn rules(&self, entity_type: EntityType) -> &TypeRules {
        &self.rules[&entity_type]
    }

    pub fn transform(&self, record: &SourceRecord) -> Result<CanonicalEntity, TransformError> {
        let rules = self.rules(record.entity_type);
        let key = derive_key(record, &rules.key)?;

        if !record.entity_type.is_valid_key(&key) {
            return Err(TransformError::InvalidKey {
                key,
                entity_type: record.entity_type.to_string(),
            });
        }

        let mut attrs = Attributes::new();
        for rule in &rules.fields {
            match coerce_field(record.get(rule.name), rule.kind) {
                Some(v) => {
                    attrs.insert(rule.name.to_string(), v);
                }
                None => {
                    if let Some(default) = &rule.default {
                        trace!(key = %key, field = rule.name, "Applying default");
                        attrs.insert(rule.name.to_string(), default.clone());
                    } else if rule.required {
                        return Err(TransformError::MissingRequired {
                            key,
                            field: rule.name.to_string(),
                        });
                    }
                }
            }
        }

        derive_fields(record.entity_type, &key, &mut attrs);
        attrs.insert("source".into(), json!(record.source));

        Ok(CanonicalEntity::new(record.entity_type, key, attrs))
    }
}

fn coerce_field(raw: Option<&Value>, kind: FieldKind) -> Option<Value> {
    let raw = raw?;
    match kind {
        FieldKind::Text     => coerce::text(raw).map(Value::from),
        FieldKind::Integer  => coerce::integer(raw).map(Value::from),
        FieldKind::Float    => coerce::float(raw).map(Value::from),
        FieldKind::Boolean  => coerce::boolean(raw).map(Value::from),
        FieldKind::Date     => coerce::date(raw).map(Value::from),
        FieldKind::TextList => coerce::text_list(raw).map(Value::from),
    }
}

// ── Natural key ───────────────────────────────────────────────────────────────

fn derive_key(record: &SourceRecord, spec: &KeySpec) -> Result<String, TransformError> {
    let raw = record
        .get(spec.key_field())
        .and_then(coerce::text)
        .ok_or_else(|| TransformError::MissingKey { field: spec.key_field().to_string() })?;

    Ok(match spec {
        KeySpec::Authority { authority_field, default_authority, .. } => {
            let authority = record
                .get(authority_field)
                .and_then(coerce::text)
                .unwrap_or_else(|| default_authority.to_string())
                .to_uppercase();
            let id = strip_prefix(&raw, &authority, ":");
            format!("{authority}:{}", numeric_part(&id, None))
        }
        KeySpec::Accession { prefix, separator, width, .. } => {
            let id = strip_prefix(&raw, prefix, separator);
            format!("{prefix}{separator}{}", numeric_part(&id, *width))
        }
    })
}

/// Remove a leading `PREFIX` plus separator, case-insensitively.
fn strip_prefix(raw: &str, prefix: &str, separator: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let rest = upper.strip_prefix(prefix).unwrap_or(&upper);
    let rest = rest.strip_prefix(separator).unwrap_or(rest);
    rest.trim_start_matches(':').trim().to_string()
}

/// Digits with thousand separators removed, zero-padded when requested.
/// Anything non-numeric is passed through so the format check rejects it.
fn numeric_part(id: &str, width: Option<usize>) -> String {
    let cleaned = id.replace(',', "");
    match (cleaned.parse::<u64>(), width) {
        (Ok(n), Some(w)) => format!("{n:0w$}"),
        (Ok(n), None)    => n.to_string(),
        (Err(_), _)      => cleaned,
    }
}

// ── Derived fields ────────────────────────────────────────────────────────────

fn derive_fields(entity_type: EntityType, key: &str, attrs: &mut Attributes) {
    if let Some(name) = attrs.get("name").and_then(Value::as_str) {
        let normalized = coerce::normalized_name(name);
        attrs.insert("name_normalized".into(), json!(normalized));
    }
    let (_, local_id) = key.split_once(':').unwrap_or(("", key));

    match entity_type {
        EntityType::Disease => {
            if key.starts_with("OMIM:") {
                attrs.insert("omim_url".into(), json!(format!("https://omim.org/entry/{local_id}")));
            }
        }
        EntityType::Gene => {
            if let Some(symbol) = attrs.get("symbol").and_then(Value::as_str) {
                let upper = symbol.to_uppercase();
                attrs.insert("symbol".into(), json!(upper));
            }
            attrs.insert(
                "hgnc_url".into(),
                json!(format!("https://www.genenames.org/data/gene-symbol-report/#!/hgnc_id/{key}")),
            );
            let start = attrs.get("start").and_then(Value::as_i64);
            let end = attrs.get("end").and_then(Value::as_i64);
            if let (Some(s), Some(e)) = (start, end) {
                attrs.insert("locus_length".into(), json!(e - s));
            }
        }
        EntityType::Phenotype => {
            attrs.insert("hpo_url".into(), json!(format!("https://hpo.jax.org/browse/term/{key}")));
        }
        EntityType::Drug => {
            attrs.insert(
                "chembl_url".into(),
                json!(format!("https://www.ebi.ac.uk/chembl/compound_report_card/{key}/")),
            );
            let phase = attrs.get("max_phase").and_then(Value::as_i64).unwrap_or(0);
            attrs.insert("is_approved".into(), json!(phase >= 4));
        }
        EntityType::Publication => {
            attrs.insert(
                "pubmed_url".into(),
                json!(format!("https://pubmed.ncbi.nlm.nih.gov/{local_id}/")),
            );
            if let Some(doi) = attrs.get("doi").and_then(Value::as_str) {
                let url = format!("https://doi.org/{doi}");
                attrs.insert("doi_url".into(), json!(url));
            }
            let year = attrs
                .get("published")
                .and_then(Value::as_str)
                .and_then(|d| d.get(..4))
                .and_then(|y| y.parse::<i64>().ok());
            if let Some(y) = year {
                attrs.insert("pub_year".into(), json!(y));
            }
        }
    }
}

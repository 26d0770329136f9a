//! Per-entity-type field rules and natural-key specifications.

use meridian_common::EntityType;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Normalised to `YYYY-MM-DD`.
    Date,
    TextList,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Used when the field is absent or cannot be coerced.
    pub default: Option<Value>,
    pub required: bool,
}

impl FieldRule {
    fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, default: None, required: false }
    }

    fn required(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, default: None, required: true }
    }

    fn defaulted(name: &'static str, kind: FieldKind, default: Value) -> Self {
        Self { name, kind, default: Some(default), required: false }
    }
}

/// How the natural key is built from raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    /// `{AUTHORITY}:{identifier}`. The authority field falls back to a default.
    Authority {
        authority_field: &'static str,
        identifier_field: &'static str,
        default_authority: &'static str,
    },
    /// `{prefix}{separator}{number}` from one field. A raw value already
    /// carrying the prefix is accepted. `width` zero-pads the number.
    Accession {
        field: &'static str,
        prefix: &'static str,
        separator: &'static str,
        width: Option<usize>,
    },
}

impl KeySpec {
    /// The raw field whose absence means "no natural key".
    pub fn key_field(&self) -> &'static str {
        match self {
            KeySpec::Authority { identifier_field, .. } => identifier_field,
            KeySpec::Accession { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRules {
    pub key: KeySpec,
    pub fields: Vec<FieldRule>,
}

/// Rules for one entity type. Required fields mirror `EntityType::required_attributes`.
pub fn rules_for(entity_type: EntityType) -> TypeRules {
    use FieldKind::*;

    match entity_type {
        EntityType::Disease => TypeRules {
            key: KeySpec::Authority {
                authority_field: "authority",
                identifier_field: "identifier",
                default_authority: "OMIM",
            },
            fields: vec![
                FieldRule::required("name", Text),
                FieldRule::optional("description", Text),
                FieldRule::defaulted("inheritance", Text, json!("unknown")),
                FieldRule::optional("prevalence", Float),
                FieldRule::defaulted("is_rare", Boolean, json!(false)),
                FieldRule::optional("first_described", Date),
                FieldRule::defaulted("synonyms", TextList, json!([])),
            ],
        },
        EntityType::Gene => TypeRules {
            key: KeySpec::Accession { field: "identifier", prefix: "HGNC", separator: ":", width: None },
            fields: vec![
                FieldRule::required("symbol", Text),
                FieldRule::required("name", Text),
                FieldRule::optional("chromosome", Text),
                FieldRule::optional("start", Integer),
                FieldRule::optional("end", Integer),
                FieldRule::defaulted("locus_type", Text, json!("gene with protein product")),
                FieldRule::defaulted("is_protein_coding", Boolean, json!(true)),
            ],
        },
        EntityType::Phenotype => TypeRules {
            key: KeySpec::Accession { field: "identifier", prefix: "HP", separator: ":", width: Some(7) },
            fields: vec![
                FieldRule::required("name", Text),
                FieldRule::optional("definition", Text),
                FieldRule::optional("frequency", Float),
                FieldRule::defaulted("is_obsolete", Boolean, json!(false)),
            ],
        },
        EntityType::Drug => TypeRules {
            key: KeySpec::Accession { field: "chembl_id", prefix: "CHEMBL", separator: "", width: None },
            fields: vec![
                FieldRule::required("name", Text),
                FieldRule::defaulted("max_phase", Integer, json!(0)),
                FieldRule::optional("molecular_weight", Float),
                FieldRule::optional("first_approval", Date),
                FieldRule::defaulted("is_withdrawn", Boolean, json!(false)),
            ],
        },
        EntityType::Publication => TypeRules {
            key: KeySpec::Accession { field: "pmid", prefix: "PMID", separator: ":", width: None },
            fields: vec![
                FieldRule::required("title", Text),
                FieldRule::optional("journal", Text),
                FieldRule::optional("published", Date),
                FieldRule::optional("doi", Text),
                FieldRule::defaulted("authors", TextList, json!([])),
                FieldRule::defaulted("citation_count", Integer, json!(0)),
            ],
        },
    }
}

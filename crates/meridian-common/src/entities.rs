/// Core record types flowing through the pipeline.
/// These are store-agnostic: each backend maps them onto its own physical schema.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MeridianError;

/// Attribute map of a canonical record. Ordered, so serialised output is stable.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

lazy_static! {
    static ref DISEASE_ID: Regex     = Regex::new(r"^[A-Z]+:[0-9]+$").expect("static regex");
    static ref GENE_ID: Regex        = Regex::new(r"^HGNC:[0-9]+$").expect("static regex");
    static ref PHENOTYPE_ID: Regex   = Regex::new(r"^HP:[0-9]{7}$").expect("static regex");
    static ref DRUG_ID: Regex        = Regex::new(r"^CHEMBL[0-9]+$").expect("static regex");
    static ref PUBLICATION_ID: Regex = Regex::new(r"^PMID:[0-9]+$").expect("static regex");
}

// ---------------------------------------------------------------------------
// Entity type
// ---------------------------------------------------------------------------

/// Biomedical entity types handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Disease,
    Gene,
    Phenotype,
    Drug,
    Publication,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Disease,
        EntityType::Gene,
        EntityType::Phenotype,
        EntityType::Drug,
        EntityType::Publication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Disease     => "disease",
            EntityType::Gene        => "gene",
            EntityType::Phenotype   => "phenotype",
            EntityType::Drug        => "drug",
            EntityType::Publication => "publication",
        }
    }

    /// Format every stored natural key of this type must match.
    pub fn identifier_pattern(&self) -> &'static Regex {
        match self {
            EntityType::Disease     => &DISEASE_ID,
            EntityType::Gene        => &GENE_ID,
            EntityType::Phenotype   => &PHENOTYPE_ID,
            EntityType::Drug        => &DRUG_ID,
            EntityType::Publication => &PUBLICATION_ID,
        }
    }

    /// Attributes that must be present and non-null on every stored entity.
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            EntityType::Disease     => &["name"],
            EntityType::Gene        => &["symbol", "name"],
            EntityType::Phenotype   => &["name"],
            EntityType::Drug        => &["name"],
            EntityType::Publication => &["title"],
        }
    }

    pub fn is_valid_key(&self, key: &str) -> bool {
        self.identifier_pattern().is_match(key)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = MeridianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disease"                   => Ok(EntityType::Disease),
            "gene"                      => Ok(EntityType::Gene),
            "phenotype"                 => Ok(EntityType::Phenotype),
            "drug"                      => Ok(EntityType::Drug),
            "publication" | "literature" => Ok(EntityType::Publication),
            _ => Err(MeridianError::FatalConfig(format!("Unknown entity type: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// A logical collection inside a store: one per entity type, plus associations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Collection {
    Entity(EntityType),
    Association,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Entity(t) => t.as_str(),
            Collection::Association => "association",
        }
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            Collection::Entity(t) => Some(*t),
            Collection::Association => None,
        }
    }
}

impl From<EntityType> for Collection {
    fn from(t: EntityType) -> Self {
        Collection::Entity(t)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Collection> for String {
    fn from(c: Collection) -> Self {
        c.as_str().to_string()
    }
}

impl TryFrom<String> for Collection {
    type Error = MeridianError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::str::FromStr for Collection {
    type Err = MeridianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "association" {
            Ok(Collection::Association)
        } else {
            s.parse::<EntityType>().map(Collection::Entity)
        }
    }
}

// ---------------------------------------------------------------------------
// Source record
// ---------------------------------------------------------------------------

/// Raw record as produced by a source adapter. Lives for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub entity_type: EntityType,
    /// Provenance, e.g. `synthetic` or the source URI.
    pub source: String,
    pub fields: Attributes,
}

impl SourceRecord {
    pub fn new(entity_type: EntityType, source: impl Into<String>, fields: Attributes) -> Self {
        Self { entity_type, source: source.into(), fields }
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }
}

// ---------------------------------------------------------------------------
// Canonical entity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub natural_key: String,
    pub entity_type: EntityType,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    pub fn new(entity_type: EntityType, natural_key: String, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            natural_key,
            entity_type,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Association
// ---------------------------------------------------------------------------

/// Typed relationship between two canonical entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub from_key: String,
    pub from_type: EntityType,
    pub to_key: String,
    pub to_type: EntityType,
    pub relation_type: String,
    pub evidence: String,
    pub confidence: f64,
}

impl Association {
    /// Upsert key: `(from_key, to_key, relation_type)`.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.from_key, self.relation_type, self.to_key)
    }

    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("from_key".into(), self.from_key.clone().into());
        attrs.insert("from_type".into(), self.from_type.as_str().into());
        attrs.insert("to_key".into(), self.to_key.clone().into());
        attrs.insert("to_type".into(), self.to_type.as_str().into());
        attrs.insert("relation_type".into(), self.relation_type.clone().into());
        attrs.insert("evidence".into(), self.evidence.clone().into());
        attrs.insert("confidence".into(), self.confidence.into());
        attrs
    }

    /// Rebuild an association from stored attributes. `None` if any field is missing.
    pub fn from_attributes(attrs: &Attributes) -> Option<Self> {
        let text = |k: &str| attrs.get(k).and_then(|v| v.as_str()).map(str::to_string);
        Some(Self {
            from_key: text("from_key")?,
            from_type: text("from_type")?.parse().ok()?,
            to_key: text("to_key")?,
            to_type: text("to_type")?.parse().ok()?,
            relation_type: text("relation_type")?,
            evidence: text("evidence").unwrap_or_default(),
            confidence: attrs.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Loadable / LoadBatch
// ---------------------------------------------------------------------------

/// Anything the dual-store loader can upsert.
pub trait Loadable: Send + Sync {
    fn collection(&self) -> Collection;
    fn natural_key(&self) -> String;
    fn attributes(&self) -> Attributes;
}

impl Loadable for CanonicalEntity {
    fn collection(&self) -> Collection {
        Collection::Entity(self.entity_type)
    }

    fn natural_key(&self) -> String {
        self.natural_key.clone()
    }

    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }
}

impl Loadable for Association {
    fn collection(&self) -> Collection {
        Collection::Association
    }

    fn natural_key(&self) -> String {
        self.key()
    }

    fn attributes(&self) -> Attributes {
        self.to_attributes()
    }
}

/// Unit of work submitted to the loader. Atomic only at submission level.
#[derive(Debug, Clone)]
pub struct LoadBatch<R = CanonicalEntity> {
    pub collection: Collection,
    pub records: Vec<R>,
    pub attempted_at: DateTime<Utc>,
}

impl<R: Loadable> LoadBatch<R> {
    pub fn new(collection: impl Into<Collection>, records: Vec<R>) -> Self {
        Self {
            collection: collection.into(),
            records,
            attempted_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

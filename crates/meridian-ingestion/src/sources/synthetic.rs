//! Deterministic synthetic record generator.
//!
//! Used when no `source_uri` is configured. Generation is a pure function of
//! `(seed, entity_type, position)`, separated from any I/O, so a run can be
//! reproduced exactly. Raw values are deliberately messy (numbers as strings,
//! mixed boolean spellings, several date formats) so the transformer's
//! coercion rules get exercised.
//!
//! Duplicates: exactly `round(n * duplicate_rate)` positions (never the first)
//! repeat the natural key of an earlier well-formed record.
//! Malformed: exactly `round(n * malformed_rate)` other positions lose their key field.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use meridian_common::{Attributes, EntityType, SourceRecord};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{RecordStream, SourceAdapter, SourceConfig};

pub const DEFAULT_SEED: u64 = 0x6d65_7269_6469_616e;
const SOURCE_NAME: &str = "synthetic";

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticSource;

impl SourceAdapter for SyntheticSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn produce(
        &self,
        entity_type: EntityType,
        config: &SourceConfig,
        cancel: CancellationToken,
    ) -> RecordStream {
        let plan = SyntheticPlan::new(
            entity_type,
            config.target_count,
            config.seed.unwrap_or(DEFAULT_SEED),
            config.duplicate_rate,
            config.malformed_rate,
        );
        stream::iter(0..plan.len())
            .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
            .map(move |i| Ok(plan.record(i)))
            .boxed()
    }
}

// ── Plan ──────────────────────────────────────────────────────────────────────

/// Key assignment for one generated sequence.
#[derive(Debug, Clone)]
pub struct SyntheticPlan {
    entity_type: EntityType,
    seed: u64,
    key_ids: Vec<u64>,
    malformed: HashSet<usize>,
}

impl SyntheticPlan {
    pub fn new(
        entity_type: EntityType,
        target_count: usize,
        seed: u64,
        duplicate_rate: f64,
        malformed_rate: f64,
    ) -> Self {
        let n = target_count;
        let mut rng = StdRng::seed_from_u64(mix(seed, entity_type, u64::MAX));

        // Position 0 is always a fresh, well-formed record.
        let mut positions: Vec<usize> = (1..n).collect();
        positions.shuffle(&mut rng);

        let n_dup = ((n as f64) * duplicate_rate).round() as usize;
        let n_dup = n_dup.min(positions.len());
        let n_bad = (((n as f64) * malformed_rate).round() as usize).min(positions.len() - n_dup);

        let duplicates: HashSet<usize> = positions[..n_dup].iter().copied().collect();
        let malformed: HashSet<usize> = positions[n_dup..n_dup + n_bad].iter().copied().collect();

        let mut key_ids = Vec::with_capacity(n);
        let mut emitted: Vec<u64> = Vec::new();
        let mut next_id = 0u64;
        for i in 0..n {
            if duplicates.contains(&i) && !emitted.is_empty() {
                let pick = emitted[rng.gen_range(0..emitted.len())];
                key_ids.push(pick);
            } else {
                key_ids.push(next_id);
                if !malformed.contains(&i) {
                    emitted.push(next_id);
                }
                next_id += 1;
            }
        }

        Self { entity_type, seed, key_ids, malformed }
    }

    pub fn len(&self) -> usize {
        self.key_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_ids.is_empty()
    }

    /// Distinct natural keys that will survive transformation.
    pub fn expected_unique(&self) -> usize {
        self.key_ids
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.malformed.contains(i))
            .map(|(_, id)| *id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Record at `position`. Pure: same plan and position give the same record.
    pub fn record(&self, position: usize) -> SourceRecord {
        let mut rng = StdRng::seed_from_u64(mix(self.seed, self.entity_type, position as u64));
        let id = self.key_ids[position];
        let mut fields = generate_fields(self.entity_type, id, &mut rng);
        if self.malformed.contains(&position) {
            for key_field in key_fields(self.entity_type) {
                fields.remove(*key_field);
            }
        }
        SourceRecord::new(self.entity_type, SOURCE_NAME, fields)
    }
}

/// splitmix64 over the seed, the type and the position.
fn mix(seed: u64, entity_type: EntityType, position: u64) -> u64 {
    let type_salt = (entity_type as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut z = seed ^ type_salt ^ position.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn key_fields(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Disease | EntityType::Gene | EntityType::Phenotype => &["identifier"],
        EntityType::Drug        => &["chembl_id"],
        EntityType::Publication => &["pmid"],
    }
}

// ── Field generation ──────────────────────────────────────────────────────────

const DISEASE_STEMS: &[&str] = &[
    "cardio", "neuro", "myo", "osteo", "hepato", "nephro", "dermato", "retino", "leuko", "angio",
];
const DISEASE_SUFFIXES: &[&str] = &["pathy", "dystrophy", "sclerosis", "plasia", "itis", "oma"];
const INHERITANCE: &[&str] = &[
    "autosomal dominant", "autosomal recessive", "X-linked", "mitochondrial", "unknown",
];
const PHENO_ADJ: &[&str] = &["Abnormal", "Increased", "Decreased", "Absent", "Delayed", "Progressive"];
const PHENO_NOUN: &[&str] = &[
    "muscle tone", "heart rate", "bone density", "visual acuity", "gait", "skin pigmentation",
];
const DRUG_STEMS: &[&str] = &["ima", "beva", "tra", "rito", "ola", "pembro", "nivo", "sora"];
const DRUG_SUFFIXES: &[&str] = &["tinib", "zumab", "parib", "mab", "fenib", "statin"];
const JOURNALS: &[&str] = &[
    "Nature Genetics", "Am J Hum Genet", "Lancet", "NEJM", "Hum Mol Genet", "PLoS Genet",
];
const SURNAMES: &[&str] = &["Smith", "Garcia", "Chen", "Okafor", "Müller", "Tanaka", "Silva", "Novak"];

fn pick<'a, R: Rng>(rng: &mut R, items: &'a [&'a str]) -> &'a str {
    items[rng.gen_range(0..items.len())]
}

/// A number, sometimes rendered as a string with thousand separators.
fn messy_int<R: Rng>(rng: &mut R, n: i64) -> Value {
    match rng.gen_range(0..3) {
        0 => json!(n),
        1 => json!(n.to_string()),
        _ => {
            let s = n.to_string();
            let mut out = String::new();
            for (i, c) in s.chars().enumerate() {
                if i > 0 && (s.len() - i) % 3 == 0 {
                    out.push(',');
                }
                out.push(c);
            }
            json!(out)
        }
    }
}

fn messy_float<R: Rng>(rng: &mut R, x: f64) -> Value {
    if rng.gen_bool(0.5) { json!(x) } else { json!(format!("{x:.4}")) }
}

fn messy_bool<R: Rng>(rng: &mut R, b: bool) -> Value {
    match rng.gen_range(0..4) {
        0 => json!(b),
        1 => json!(if b { "yes" } else { "no" }),
        2 => json!(if b { "1" } else { "0" }),
        _ => json!(if b { "TRUE" } else { "False" }),
    }
}

fn messy_date<R: Rng>(rng: &mut R) -> Value {
    let (y, m, d) = (rng.gen_range(1950..2024), rng.gen_range(1..=12), rng.gen_range(1..=28));
    match rng.gen_range(0..5) {
        0 => json!(format!("{y:04}-{m:02}-{d:02}")),
        1 => json!(format!("{y:04}/{m:02}/{d:02}")),
        2 => json!(format!("{d:02}.{m:02}.{y:04}")),
        3 => json!(y.to_string()),
        _ => json!(format!("{y:04}-{m:02}-{d:02}T00:00:00Z")),
    }
}

fn messy_list<R: Rng>(rng: &mut R, items: Vec<String>) -> Value {
    match rng.gen_range(0..3) {
        0 => json!(items),
        1 => json!(items.join("; ")),
        _ => json!(items.join("|")),
    }
}

fn generate_fields<R: Rng>(entity_type: EntityType, id: u64, rng: &mut R) -> Attributes {
    let mut f = Attributes::new();
    match entity_type {
        EntityType::Disease => {
            let stem = pick(rng, DISEASE_STEMS);
            let name = format!("{stem}{} type {}", pick(rng, DISEASE_SUFFIXES), id % 9 + 1);
            f.insert("authority".into(), json!("OMIM"));
            f.insert("identifier".into(), messy_int(rng, 100_000 + id as i64));
            f.insert("name".into(), json!(capitalise(&name)));
            f.insert("inheritance".into(), json!(pick(rng, INHERITANCE)));
            let prevalence = rng.gen_range(0.000_01..0.01);
            f.insert("prevalence".into(), messy_float(rng, prevalence));
            let rare = rng.gen_bool(0.7);
            f.insert("is_rare".into(), messy_bool(rng, rare));
            f.insert("first_described".into(), messy_date(rng));
            let n_syns = rng.gen_range(0..3);
            let syns = (0..n_syns).map(|k| format!("{name} variant {k}")).collect();
            f.insert("synonyms".into(), messy_list(rng, syns));
        }
        EntityType::Gene => {
            let symbol = format!("{}{}", pick(rng, &["BRC", "TP", "MY", "COL", "SCN", "KCN"]), id + 1);
            let start = rng.gen_range(10_000..200_000_000i64);
            f.insert("authority".into(), json!("HGNC"));
            f.insert("identifier".into(), messy_int(rng, 1 + id as i64));
            f.insert("symbol".into(), json!(if rng.gen_bool(0.2) { symbol.to_lowercase() } else { symbol.clone() }));
            f.insert("name".into(), json!(format!("{symbol} protein coding gene")));
            f.insert("chromosome".into(), json!(rng.gen_range(1..=22).to_string()));
            f.insert("start".into(), messy_int(rng, start));
            let end = start + rng.gen_range(1_000..500_000);
            f.insert("end".into(), messy_int(rng, end));
            let coding = rng.gen_bool(0.9);
            f.insert("is_protein_coding".into(), messy_bool(rng, coding));
        }
        EntityType::Phenotype => {
            f.insert("authority".into(), json!("HP"));
            f.insert("identifier".into(), messy_int(rng, 1 + id as i64));
            f.insert("name".into(), json!(format!("{} {}", pick(rng, PHENO_ADJ), pick(rng, PHENO_NOUN))));
            f.insert("definition".into(), json!(format!("Synthetic phenotype term {}", id + 1)));
            let frequency = rng.gen_range(0.0..1.0);
            f.insert("frequency".into(), messy_float(rng, frequency));
            let obsolete = rng.gen_bool(0.05);
            f.insert("is_obsolete".into(), messy_bool(rng, obsolete));
        }
        EntityType::Drug => {
            let name = format!("{}{}", pick(rng, DRUG_STEMS), pick(rng, DRUG_SUFFIXES));
            let chembl = format!("CHEMBL{}", id + 1);
            f.insert("chembl_id".into(), json!(if rng.gen_bool(0.2) { chembl.to_lowercase() } else { chembl }));
            f.insert("name".into(), json!(name));
            let phase = rng.gen_range(0..=4);
            f.insert("max_phase".into(), messy_int(rng, phase));
            let weight = rng.gen_range(150.0..900.0);
            f.insert("molecular_weight".into(), messy_float(rng, weight));
            f.insert("first_approval".into(), messy_date(rng));
            let withdrawn = rng.gen_bool(0.05);
            f.insert("is_withdrawn".into(), messy_bool(rng, withdrawn));
        }
        EntityType::Publication => {
            let pmid = 10_000_000 + id as i64;
            f.insert(
                "pmid".into(),
                if rng.gen_bool(0.3) { json!(format!("PMID:{pmid}")) } else { messy_int(rng, pmid) },
            );
            f.insert("title".into(), json!(format!(
                "{} in {}: a cohort study",
                pick(rng, PHENO_ADJ),
                pick(rng, PHENO_NOUN)
            )));
            f.insert("journal".into(), json!(pick(rng, JOURNALS)));
            f.insert("published".into(), messy_date(rng));
            if rng.gen_bool(0.6) {
                let registrant = rng.gen_range(1000..9999);
                f.insert("doi".into(), json!(format!("10.{registrant}/mer.{pmid}")));
            }
            let n_authors = rng.gen_range(1..5);
            let authors = (0..n_authors).map(|_| pick(rng, SURNAMES).to_string()).collect();
            f.insert("authors".into(), messy_list(rng, authors));
            let citations = rng.gen_range(0..5_000);
            f.insert("citation_count".into(), messy_int(rng, citations));
        }
    }
    f
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

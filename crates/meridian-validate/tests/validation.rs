//! Reconciliation over in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use meridian_common::{Association, Attributes, Collection, EntityType};
use meridian_db::fakes::FaultyStore;
use meridian_db::{MemoryStore, Store, StoreSet, StoredRecord, Violation, WriteOutcome};
use meridian_validate::{IssueKind, LoadTotals, Validator, AXIS_POINTS};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn named(name: &str) -> Attributes {
    let mut a = Attributes::new();
    a.insert("name".into(), json!(name));
    a
}

async fn diseases(store: &MemoryStore, n: usize) {
    for i in 0..n {
        let key = format!("OMIM:{}", 100_000 + i);
        store.upsert(Collection::Entity(EntityType::Disease), &key, &named("x")).await.unwrap();
    }
}

fn totals(n: u64) -> LoadTotals {
    LoadTotals { attempted: n, succeeded: n }
}

#[tokio::test]
async fn clean_stores_score_100() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    diseases(&p, 10).await;
    diseases(&s, 10).await;

    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Disease], totals(20), &CancellationToken::new())
        .await;

    assert!(report.is_clean());
    assert_eq!(report.quality_score, 100.0);
    assert_eq!(report.records_scanned, 20);
    assert_eq!(report.per_entity_type["disease"].primary_count, 10);
    assert_eq!(report.per_entity_type["association"].divergence, 0);
}

#[tokio::test]
async fn divergence_lowers_sync_axis() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    diseases(&p, 10).await;
    diseases(&s, 5).await;

    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Disease], totals(15), &CancellationToken::new())
        .await;

    assert_eq!(report.divergence_for("disease"), 5);
    assert!((report.score.sync - 12.5).abs() < 1e-9);
    assert!(report.quality_score < 100.0);
}

#[tokio::test]
async fn orphan_association_is_reported() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    diseases(&p, 1).await;
    diseases(&s, 1).await;
    let orphan = Association {
        from_key: "HGNC:42".into(),
        from_type: EntityType::Gene,
        to_key: "OMIM:100000".into(),
        to_type: EntityType::Disease,
        relation_type: "associated_with".into(),
        evidence: "curated".into(),
        confidence: 0.9,
    };
    for store in [&p, &s] {
        store.upsert(Collection::Association, &orphan.key(), &orphan.to_attributes()).await.unwrap();
    }

    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Disease, EntityType::Gene], totals(4), &CancellationToken::new())
        .await;

    assert_eq!(report.associations_checked, 1);
    assert_eq!(report.referential_violations.len(), 2);
    assert_eq!(report.referential_violations[0].missing, vec![(EntityType::Gene, "HGNC:42".to_string())]);
    assert_eq!(report.score.referential, 0.0);
}

#[tokio::test]
async fn consistency_findings() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    let c = Collection::Entity(EntityType::Drug);
    for store in [&p, &s] {
        store.upsert(c, "CHEMBL1", &named("aspirin")).await.unwrap();
        store.upsert(c, "chembl2", &named("bad key")).await.unwrap();
        store.upsert(c, "CHEMBL3", &Attributes::new()).await.unwrap();
    }

    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Drug], totals(6), &CancellationToken::new())
        .await;

    let kinds: Vec<_> = report.consistency_issues.iter().map(|i| i.kind.clone()).collect();
    assert_eq!(kinds.iter().filter(|k| **k == IssueKind::InvalidIdentifier).count(), 2);
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == IssueKind::MissingRequired { field: "name".into() })
            .count(),
        2
    );
    assert!((report.score.consistency - AXIS_POINTS * (1.0 - 4.0 / 6.0)).abs() < 1e-9);
}

/// Returns every row of a collection twice, as a store without a key constraint might.
struct DuplicatingStore(MemoryStore);

#[async_trait]
impl Store for DuplicatingStore {
    fn name(&self) -> &str {
        self.0.name()
    }
    async fn ping(&self) -> meridian_db::Result<()> {
        self.0.ping().await
    }
    async fn upsert(&self, c: Collection, k: &str, a: &Attributes) -> meridian_db::Result<WriteOutcome> {
        self.0.upsert(c, k, a).await
    }
    async fn count(&self, c: Collection) -> meridian_db::Result<u64> {
        Ok(self.0.count(c).await? * 2)
    }
    async fn find_by_natural_key(&self, c: Collection, k: &str) -> meridian_db::Result<Option<StoredRecord>> {
        self.0.find_by_natural_key(c, k).await
    }
    async fn check_foreign_keys(&self, t: EntityType, refs: &[String]) -> meridian_db::Result<Vec<Violation>> {
        self.0.check_foreign_keys(t, refs).await
    }
    async fn scan(&self, c: Collection) -> meridian_db::Result<Vec<StoredRecord>> {
        let rows = self.0.scan(c).await?;
        Ok(rows.iter().chain(rows.iter()).cloned().collect())
    }
}

#[tokio::test]
async fn duplicate_keys_are_flagged() {
    let p = MemoryStore::new("dup");
    diseases(&p, 3).await;
    let s = Arc::new(MemoryStore::new("s"));
    diseases(&s, 3).await;

    let report = Validator::new(StoreSet::new(Arc::new(DuplicatingStore(p)), s))
        .validate(&[EntityType::Disease], totals(6), &CancellationToken::new())
        .await;

    let dups: Vec<_> = report
        .consistency_issues
        .iter()
        .filter(|i| i.kind == IssueKind::DuplicateKey)
        .collect();
    assert_eq!(dups.len(), 3);
    assert!(dups.iter().all(|i| i.store == "dup"));
    assert_eq!(report.divergence_for("disease"), 3);
}

#[tokio::test]
async fn unreadable_store_counts_as_empty() {
    let p = Arc::new(MemoryStore::new("p"));
    diseases(&p, 4).await;
    let inner = Arc::new(MemoryStore::new("s"));
    diseases(&inner, 4).await;
    let s = Arc::new(FaultyStore::new(inner));
    s.set_offline(true);

    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Disease], totals(8), &CancellationToken::new())
        .await;

    assert_eq!(report.per_entity_type["disease"].secondary_count, 0);
    assert_eq!(report.divergence_for("disease"), 4);
    let unreadable: Vec<_> = report
        .consistency_issues
        .iter()
        .filter(|i| i.kind == IssueKind::StoreUnreadable)
        .collect();
    assert_eq!(unreadable.len(), 1);
}

#[tokio::test]
async fn validation_does_not_write() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    diseases(&p, 3).await;
    let before = p.scan(Collection::Entity(EntityType::Disease)).await.unwrap();

    Validator::new(StoreSet::new(p.clone(), s.clone()))
        .validate(&EntityType::ALL, totals(3), &CancellationToken::new())
        .await;

    assert_eq!(p.scan(Collection::Entity(EntityType::Disease)).await.unwrap(), before);
    assert_eq!(s.count(Collection::Entity(EntityType::Disease)).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_validation_only_counts() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    diseases(&p, 2).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Disease], totals(2), &cancel)
        .await;

    assert_eq!(report.skipped_checks, vec!["referential", "consistency"]);
    assert_eq!(report.records_scanned, 0);
    assert_eq!(report.divergence_for("disease"), 2);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn report_serialises_to_json() {
    let (p, s) = (Arc::new(MemoryStore::new("p")), Arc::new(MemoryStore::new("s")));
    let report = Validator::new(StoreSet::new(p, s))
        .validate(&[EntityType::Gene], LoadTotals::default(), &CancellationToken::new())
        .await;
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["quality_score"], json!(100.0));
    assert!(value.get("skipped_checks").is_none());
}

//! End-to-end runs over in-memory stores.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use meridian_common::{
    AssociationPlan, Attributes, Collection, EntityType, MeridianError, PolicySpec, RunConfig,
};
use meridian_db::fakes::FaultyStore;
use meridian_db::{MemoryStore, Store, StoreSet, StoredRecord, Violation, WriteOutcome};
use meridian_ingestion::{run_pipeline, PipelineError, PipelineProgress, RunReport, RunStatus};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn config(types: &[&str], count: usize, seed: u64) -> RunConfig {
    RunConfig {
        entity_types: types.iter().map(|t| t.to_string()).collect(),
        default_target_count: count,
        seed: Some(seed),
        batch_size: 100,
        chunk_size: 50,
        ..Default::default()
    }
}

fn memory_pair() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
    (Arc::new(MemoryStore::new("primary")), Arc::new(MemoryStore::new("secondary")))
}

async fn run(config: RunConfig, primary: Arc<dyn Store>, secondary: Arc<dyn Store>) -> RunReport {
    run_pipeline(config, StoreSet::new(primary, secondary), CancellationToken::new(), None)
        .await
        .unwrap()
}

async fn count(store: &dyn Store, entity_type: EntityType) -> u64 {
    store.count(Collection::Entity(entity_type)).await.unwrap()
}

#[tokio::test]
async fn duplicates_collapse_to_unique_keys() {
    let (primary, secondary) = memory_pair();
    let mut cfg = config(&["disease"], 1000, 42);
    cfg.source.duplicate_rate = 0.05;

    let report = run(cfg, primary.clone(), secondary.clone()).await;

    assert_eq!(count(&*primary, EntityType::Disease).await, 950);
    assert_eq!(count(&*secondary, EntityType::Disease).await, 950);
    let disease = &report.per_entity_type["disease"];
    assert_eq!(disease.extracted, 1000);
    assert_eq!(disease.transformed, 1000);
    assert_eq!(disease.loaded_primary, 1000);
    assert_eq!(disease.errors, 0);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.validation.quality_score, 100.0);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn every_type_loads_into_both_stores() {
    let (primary, secondary) = memory_pair();
    let report = run(config(&["disease", "gene", "phenotype", "drug", "publication"], 120, 3), primary.clone(), secondary.clone()).await;

    for t in EntityType::ALL {
        assert_eq!(count(&*primary, t).await, 120, "{t}");
        assert_eq!(count(&*secondary, t).await, 120, "{t}");
    }
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.total_errors(), 0);
    assert!(report.validation.is_clean());
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let (primary, secondary) = memory_pair();
    let cfg = config(&["disease", "drug"], 200, 7);

    let first = run(cfg.clone(), primary.clone(), secondary.clone()).await;
    let before = primary.scan(Collection::Entity(EntityType::Drug)).await.unwrap();
    let second = run(cfg, primary.clone(), secondary.clone()).await;
    let after = primary.scan(Collection::Entity(EntityType::Drug)).await.unwrap();

    assert_eq!(first.per_entity_type, second.per_entity_type);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(count(&*primary, EntityType::Disease).await, 200);
    assert_eq!(count(&*secondary, EntityType::Drug).await, 200);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.natural_key, a.natural_key);
        assert_eq!(b.created_at, a.created_at);
        assert_eq!(b.attributes, a.attributes);
    }
}

#[tokio::test]
async fn malformed_records_are_isolated() {
    let (primary, secondary) = memory_pair();
    let mut cfg = config(&["publication"], 200, 11);
    cfg.source.malformed_rate = 0.1;

    let report = run(cfg, primary.clone(), secondary).await;

    let publication = &report.per_entity_type["publication"];
    assert_eq!(publication.extracted, 200);
    assert_eq!(publication.validation_errors, 20);
    assert_eq!(publication.transformed, 180);
    assert_eq!(publication.loaded_primary, 180);
    assert_eq!(count(&*primary, EntityType::Publication).await, 180);
    assert_eq!(report.status, RunStatus::Partial);
}

#[tokio::test]
async fn secondary_disconnect_leaves_primary_complete() {
    let primary = Arc::new(MemoryStore::new("primary"));
    let inner = Arc::new(MemoryStore::new("secondary"));
    let secondary = Arc::new(FaultyStore::new(inner.clone()).offline_after(300));

    let report = run(config(&["disease", "gene"], 500, 5), primary.clone(), secondary).await;

    assert_eq!(count(&*primary, EntityType::Disease).await, 500);
    assert_eq!(count(&*primary, EntityType::Gene).await, 500);
    let landed_secondary = count(&*inner, EntityType::Disease).await + count(&*inner, EntityType::Gene).await;
    assert_eq!(landed_secondary, 300);

    let loaded: u64 = report.per_entity_type.values().map(|r| r.loaded_secondary).sum();
    assert_eq!(loaded, 300);
    assert_eq!(report.total_errors(), 700);
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.validation.divergence_for("disease"), 500);
    assert_eq!(report.validation.divergence_for("gene"), 500);
}

#[tokio::test]
async fn unknown_entity_type_is_a_config_error() {
    let (primary, secondary) = memory_pair();
    let result = run_pipeline(
        config(&["disease", "protein"], 10, 1),
        StoreSet::new(primary.clone(), secondary),
        CancellationToken::new(),
        None,
    )
    .await;

    assert!(matches!(result, Err(PipelineError::Config(MeridianError::FatalConfig(_)))));
    assert_eq!(count(&*primary, EntityType::Disease).await, 0);
}

#[tokio::test]
async fn missing_mapping_file_is_a_config_error() {
    let (primary, secondary) = memory_pair();
    let mut cfg = config(&["gene", "disease"], 10, 1);
    cfg.associations.push(AssociationPlan {
        from: "gene".into(),
        to: "disease".into(),
        relation: None,
        policy: PolicySpec::Curated { path: "/nonexistent/mapping.tsv".into() },
        fallback_heuristic: false,
    });

    let result = run_pipeline(cfg, StoreSet::new(primary.clone(), secondary), CancellationToken::new(), None).await;

    assert!(matches!(result, Err(PipelineError::Config(_))));
    assert_eq!(count(&*primary, EntityType::Gene).await, 0);
}

#[tokio::test]
async fn both_stores_offline_aborts() {
    let primary = Arc::new(FaultyStore::new(Arc::new(MemoryStore::new("primary"))));
    let secondary = Arc::new(FaultyStore::new(Arc::new(MemoryStore::new("secondary"))));
    primary.set_offline(true);
    secondary.set_offline(true);

    let result = run_pipeline(
        config(&["drug"], 10, 1),
        StoreSet::new(primary, secondary),
        CancellationToken::new(),
        None,
    )
    .await;

    assert!(matches!(result, Err(PipelineError::AllStoresUnavailable)));
}

#[tokio::test]
async fn cancelled_before_start_reports_partial() {
    let (primary, secondary) = memory_pair();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run_pipeline(config(&["disease"], 100, 1), StoreSet::new(primary.clone(), secondary), cancel, None)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.per_entity_type["disease"].extracted, 0);
    assert_eq!(report.validation.skipped_checks, vec!["referential", "consistency"]);
    assert_eq!(count(&*primary, EntityType::Disease).await, 0);
}

/// Fires a cancellation token once a number of writes have been accepted.
struct CancellingStore {
    inner: MemoryStore,
    after: u64,
    writes: AtomicU64,
    cancel: CancellationToken,
}

#[async_trait]
impl Store for CancellingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }
    async fn ping(&self) -> meridian_db::Result<()> {
        self.inner.ping().await
    }
    async fn upsert(&self, c: Collection, k: &str, a: &Attributes) -> meridian_db::Result<WriteOutcome> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.cancel.cancel();
        }
        self.inner.upsert(c, k, a).await
    }
    async fn count(&self, c: Collection) -> meridian_db::Result<u64> {
        self.inner.count(c).await
    }
    async fn find_by_natural_key(&self, c: Collection, k: &str) -> meridian_db::Result<Option<StoredRecord>> {
        self.inner.find_by_natural_key(c, k).await
    }
    async fn check_foreign_keys(&self, t: EntityType, refs: &[String]) -> meridian_db::Result<Vec<Violation>> {
        self.inner.check_foreign_keys(t, refs).await
    }
    async fn scan(&self, c: Collection) -> meridian_db::Result<Vec<StoredRecord>> {
        self.inner.scan(c).await
    }
}

#[tokio::test]
async fn cancellation_finishes_the_batch_in_flight() {
    let cancel = CancellationToken::new();
    let primary = Arc::new(CancellingStore {
        inner: MemoryStore::new("primary"),
        after: 250,
        writes: AtomicU64::new(0),
        cancel: cancel.clone(),
    });
    let secondary = Arc::new(MemoryStore::new("secondary"));

    let report = run_pipeline(
        config(&["disease"], 1000, 9),
        StoreSet::new(primary.clone(), secondary.clone()),
        cancel,
        None,
    )
    .await
    .unwrap();

    // the third batch of 100 completes on both stores, nothing after it
    let disease = &report.per_entity_type["disease"];
    assert_eq!((disease.loaded_primary, disease.loaded_secondary), (300, 300));
    assert_eq!(count(&*primary, EntityType::Disease).await, 300);
    assert_eq!(count(&*secondary, EntityType::Disease).await, 300);
    assert!(report.cancelled);
    assert_eq!(report.status, RunStatus::Partial);
}

#[tokio::test]
async fn progress_events_are_broadcast() {
    let (primary, secondary) = memory_pair();
    let (tx, mut rx) = broadcast::channel::<PipelineProgress>(1024);
    let mut cfg = config(&["gene"], 250, 2);
    cfg.progress_interval = 100;

    let report = run_pipeline(cfg, StoreSet::new(primary, secondary), CancellationToken::new(), Some(tx))
        .await
        .unwrap();

    let mut stages = Vec::new();
    while let Ok(p) = rx.try_recv() {
        assert_eq!(p.run_id, report.run_id);
        stages.push(p.stage);
    }
    assert_eq!(stages.first().map(String::as_str), Some("start"));
    assert_eq!(stages.last().map(String::as_str), Some("complete"));
    assert_eq!(stages.iter().filter(|s| *s == "batch").count(), 3);
    // 500 store writes at an interval of 100
    assert_eq!(stages.iter().filter(|s| *s == "load").count(), 5);
}

#[tokio::test]
async fn associations_follow_entities() {
    let (primary, secondary) = memory_pair();
    let mut mapping = tempfile::NamedTempFile::new().unwrap();
    writeln!(mapping, "from_key\tto_key\trelation\tevidence\tconfidence").unwrap();
    writeln!(mapping, "HGNC:1\tOMIM:100000\t\tpmid:1\t0.8").unwrap();
    writeln!(mapping, "hgnc:2\tOMIM:100001").unwrap();
    writeln!(mapping, "HGNC:999\tOMIM:100000").unwrap();
    mapping.flush().unwrap();

    let mut cfg = config(&["gene", "disease", "phenotype"], 20, 1);
    cfg.associations = vec![
        AssociationPlan {
            from: "gene".into(),
            to: "disease".into(),
            relation: None,
            policy: PolicySpec::Curated { path: mapping.path().to_path_buf() },
            fallback_heuristic: false,
        },
        AssociationPlan {
            from: "phenotype".into(),
            to: "disease".into(),
            relation: None,
            policy: PolicySpec::HashBucket { fanout: 2 },
            fallback_heuristic: false,
        },
    ];

    let report = run(cfg, primary.clone(), secondary.clone()).await;

    let curated = &report.associations[0];
    assert_eq!((curated.generated, curated.unresolved), (2, 1));
    assert_eq!((curated.loaded_primary, curated.loaded_secondary), (2, 2));
    assert!(curated.mapping_digest.as_deref().is_some_and(|d| d.len() == 64));
    assert!(curated.skipped.is_none());

    let heuristic = &report.associations[1];
    assert_eq!(heuristic.generated, 40);
    assert_eq!(heuristic.loaded_secondary, 40);
    assert!(heuristic.mapping_digest.is_none());

    assert_eq!(primary.count(Collection::Association).await.unwrap(), 42);
    assert_eq!(report.validation.associations_checked, 42);
    assert!(report.validation.referential_violations.is_empty());
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn association_plan_skipped_when_endpoint_source_fails() {
    // An unreachable source makes every type fail before yielding a record.
    let (primary, secondary) = memory_pair();
    let mut cfg = config(&["phenotype", "disease"], 5, 1);
    cfg.source.source_uri = Some("http://127.0.0.1:9".into());
    cfg.source.request_timeout_secs = 1;
    cfg.source.retry.max_attempts = 1;
    cfg.associations.push(AssociationPlan {
        from: "phenotype".into(),
        to: "disease".into(),
        relation: None,
        policy: PolicySpec::RoundRobin,
        fallback_heuristic: false,
    });

    let report = run(cfg, primary, secondary).await;

    assert!(report.per_entity_type["phenotype"].source_failed);
    assert!(report.associations[0].skipped.as_deref().is_some_and(|s| s.contains("source failed")));
    assert_eq!(report.associations[0].generated, 0);
    assert_eq!(report.status, RunStatus::Failed);
}

//! Contract tests every `Store` backend must satisfy.

use std::sync::Arc;

use meridian_common::{Attributes, Collection, EntityType};
use serde_json::json;

use crate::fakes::FaultyStore;
use crate::{DbError, DisabledStore, MemoryStore, Store, UnreachableStore, WriteOutcome};

fn attrs(name: &str) -> Attributes {
    let mut a = Attributes::new();
    a.insert("name".into(), json!(name));
    a
}

async fn upsert_is_idempotent(store: &dyn Store) {
    let c = Collection::Entity(EntityType::Disease);
    assert_eq!(store.upsert(c, "OMIM:100", &attrs("x")).await.unwrap(), WriteOutcome::Inserted);
    assert_eq!(store.upsert(c, "OMIM:100", &attrs("y")).await.unwrap(), WriteOutcome::Updated);
    assert_eq!(store.count(c).await.unwrap(), 1);

    let found = store.find_by_natural_key(c, "OMIM:100").await.unwrap().unwrap();
    assert_eq!(found.attributes["name"], json!("y"));
    assert!(store.find_by_natural_key(c, "OMIM:999").await.unwrap().is_none());
}

async fn collections_are_isolated(store: &dyn Store) {
    let disease = Collection::Entity(EntityType::Disease);
    let gene = Collection::Entity(EntityType::Gene);
    store.upsert(disease, "K:1", &attrs("d")).await.unwrap();
    store.upsert(gene, "K:1", &attrs("g")).await.unwrap();
    assert_eq!(store.count(disease).await.unwrap(), 1);
    assert_eq!(store.count(gene).await.unwrap(), 1);
    assert_eq!(store.count(Collection::Association).await.unwrap(), 0);
}

async fn foreign_keys_report_missing(store: &dyn Store) {
    let c = Collection::Entity(EntityType::Gene);
    store.upsert(c, "HGNC:1", &attrs("a")).await.unwrap();
    let refs = vec!["HGNC:1".to_string(), "HGNC:2".to_string()];
    let violations = store.check_foreign_keys(EntityType::Gene, &refs).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].natural_key, "HGNC:2");
    assert_eq!(violations[0].entity_type, EntityType::Gene);
}

#[tokio::test]
async fn memory_store_contract() {
    upsert_is_idempotent(&MemoryStore::new("m")).await;
    collections_are_isolated(&MemoryStore::new("m")).await;
    foreign_keys_report_missing(&MemoryStore::new("m")).await;
}

#[tokio::test]
async fn faulty_store_passes_through_when_healthy() {
    let wrap = || FaultyStore::new(Arc::new(MemoryStore::new("m")));
    upsert_is_idempotent(&wrap()).await;
    collections_are_isolated(&wrap()).await;
    foreign_keys_report_missing(&wrap()).await;
}

#[tokio::test]
async fn disabled_store_skips_everything() {
    let store = DisabledStore::default();
    let c = Collection::Entity(EntityType::Drug);
    let outcome = store.upsert(c, "CHEMBL1", &attrs("aspirin")).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Skipped("store disabled".into()));
    assert_eq!(store.count(c).await.unwrap(), 0);
    assert!(store.scan(c).await.unwrap().is_empty());

    let refs = vec!["CHEMBL1".to_string()];
    assert_eq!(store.check_foreign_keys(EntityType::Drug, &refs).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_store_fails_as_unavailable() {
    let store = UnreachableStore::new("primary", "connection refused");
    let c = Collection::Entity(EntityType::Gene);
    assert!(store.ping().await.unwrap_err().is_unavailable());
    assert!(store.upsert(c, "HGNC:1", &attrs("a")).await.unwrap_err().is_unavailable());
    assert!(store.count(c).await.unwrap_err().is_unavailable());
    assert!(store.scan(c).await.is_err());
}

#[tokio::test]
async fn faulty_store_goes_offline_after_limit() {
    let store = FaultyStore::new(Arc::new(MemoryStore::new("m"))).offline_after(2);
    let c = Collection::Entity(EntityType::Phenotype);
    store.upsert(c, "HP:0000001", &attrs("a")).await.unwrap();
    store.upsert(c, "HP:0000002", &attrs("b")).await.unwrap();

    let err = store.upsert(c, "HP:0000003", &attrs("c")).await.unwrap_err();
    assert!(matches!(err, DbError::Unavailable(_)));
    assert!(store.count(c).await.is_err());
    assert!(store.ping().await.is_err());
    assert_eq!(store.writes(), 2);
}

#[tokio::test]
async fn faulty_store_rejects_listed_keys() {
    let store = FaultyStore::new(Arc::new(MemoryStore::new("m"))).reject_keys(["CHEMBL7"]);
    let c = Collection::Entity(EntityType::Drug);
    let err = store.upsert(c, "CHEMBL7", &attrs("x")).await.unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));
    assert!(store.upsert(c, "CHEMBL8", &attrs("y")).await.is_ok());
}

//! Paged HTTP source against a mock server.

use std::sync::Arc;

use futures::StreamExt;
use meridian_common::{EntityType, RetryPolicy, RunConfig};
use meridian_db::{MemoryStore, StoreSet};
use meridian_ingestion::{run_pipeline, HttpSource, RunStatus, SourceAdapter, SourceConfig, SourceError};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source_config(uri: &str, target_count: usize, page_size: usize) -> SourceConfig {
    SourceConfig {
        target_count,
        seed: None,
        source_uri: Some(uri.to_string()),
        rate_limit_ms: 0,
        duplicate_rate: 0.0,
        malformed_rate: 0.0,
        page_size,
        request_timeout_secs: 5,
        retry: RetryPolicy { max_attempts: 3, base_delay_ms: 1 },
    }
}

fn diseases(ids: std::ops::Range<u64>) -> Value {
    Value::Array(
        ids.map(|i| json!({ "authority": "omim", "identifier": 100_000 + i, "name": format!("Disease {i}") }))
            .collect(),
    )
}

fn genes(ids: std::ops::Range<u64>) -> Value {
    Value::Array(
        ids.map(|i| json!({ "identifier": format!("HGNC:{i}"), "symbol": format!("g{i}"), "name": "gene" }))
            .collect(),
    )
}

async fn page(server: &MockServer, entity: &str, offset: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{entity}")))
        .and(query_param("offset", offset))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn pages_until_target_reached() {
    let server = MockServer::start().await;
    page(&server, "disease", "0", diseases(0..2)).await;
    page(&server, "disease", "2", diseases(2..4)).await;
    page(&server, "disease", "4", diseases(4..5)).await;

    let source = HttpSource::new(&server.uri(), 5).unwrap();
    let records: Vec<_> = source
        .produce(EntityType::Disease, &source_config(&server.uri(), 5, 2), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.is_ok()));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn short_page_ends_stream() {
    let server = MockServer::start().await;
    page(&server, "disease", "0", diseases(0..3)).await;

    let source = HttpSource::new(&server.uri(), 5).unwrap();
    let records: Vec<_> = source
        .produce(EntityType::Disease, &source_config(&server.uri(), 100, 10), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(records.len(), 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/disease"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    page(&server, "disease", "0", diseases(0..2)).await;

    let source = HttpSource::new(&server.uri(), 5).unwrap();
    let records: Vec<_> = source
        .produce(EntityType::Disease, &source_config(&server.uri(), 2, 10), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.is_ok()));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn permanent_failure_ends_stream_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gene"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such collection"))
        .mount(&server)
        .await;

    let source = HttpSource::new(&server.uri(), 5).unwrap();
    let records: Vec<_> = source
        .produce(EntityType::Gene, &source_config(&server.uri(), 10, 5), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(records.len(), 1);
    assert!(matches!(records[0], Err(SourceError::Permanent { status: 404, .. })));
    // 4xx is not retried
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_interrupts_slow_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/disease"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(diseases(0..2))
                .set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let source = HttpSource::new(&server.uri(), 60).unwrap();
    let started = std::time::Instant::now();
    let records: Vec<_> = source
        .produce(EntityType::Disease, &source_config(&server.uri(), 2, 10), cancel)
        .collect()
        .await;

    assert!(records.is_empty());
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn failed_source_keeps_extracted_records() {
    let server = MockServer::start().await;
    page(&server, "disease", "0", diseases(0..2)).await;
    page(&server, "gene", "0", genes(1..3)).await;
    Mock::given(method("GET"))
        .and(path("/gene"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut config = RunConfig {
        entity_types: vec!["disease".into(), "gene".into()],
        ..Default::default()
    };
    config.target_count_per_type.insert("disease".into(), 2);
    config.target_count_per_type.insert("gene".into(), 4);
    config.source.source_uri = Some(server.uri());
    config.source.page_size = 2;
    config.source.retry = RetryPolicy { max_attempts: 2, base_delay_ms: 1 };

    let primary = Arc::new(MemoryStore::new("primary"));
    let secondary = Arc::new(MemoryStore::new("secondary"));
    let report = run_pipeline(config, StoreSet::new(primary, secondary), CancellationToken::new(), None)
        .await
        .unwrap();

    let disease = &report.per_entity_type["disease"];
    assert_eq!((disease.loaded_primary, disease.loaded_secondary), (2, 2));
    assert!(!disease.source_failed);

    let gene = &report.per_entity_type["gene"];
    assert!(gene.source_failed);
    assert_eq!(gene.extracted, 2);
    assert_eq!((gene.loaded_primary, gene.loaded_secondary), (2, 2));
    assert!(gene.source_error.as_deref().unwrap_or_default().contains("404"));

    assert_eq!(report.status, RunStatus::Partial);
}

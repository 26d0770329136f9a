//! Source adapters.
//!
//! An adapter turns `(entity_type, config)` into a finite, lazy stream of raw
//! `SourceRecord`s. Re-creating the stream with the same config replays it.
//! A stream item that is `Err` ends the stream: the entity type is then
//! marked source-failed, but records already yielded are kept.

pub mod http;
pub mod retry;
pub mod synthetic;

use futures::stream::BoxStream;
use meridian_common::{EntityType, RetryPolicy, RunConfig, SourceRecord};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

pub use http::HttpSource;
pub use synthetic::SyntheticSource;

pub type RecordStream = BoxStream<'static, Result<SourceRecord, SourceError>>;

/// Everything an adapter needs to produce one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub target_count: usize,
    pub seed: Option<u64>,
    pub source_uri: Option<String>,
    pub rate_limit_ms: u64,
    pub duplicate_rate: f64,
    pub malformed_rate: f64,
    pub page_size: usize,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl SourceConfig {
    pub fn for_type(run: &RunConfig, entity_type: EntityType) -> Self {
        let src = &run.source;
        Self {
            target_count: run.target_count_for(entity_type),
            seed: run.seed,
            source_uri: src.source_uri.clone(),
            rate_limit_ms: src.rate_limit_ms,
            duplicate_rate: src.duplicate_rate,
            malformed_rate: src.malformed_rate,
            page_size: src.page_size,
            request_timeout_secs: src.request_timeout_secs,
            retry: src.retry,
        }
    }
}

/// Common interface for all record sources.
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Start a fresh stream. Cancellation is honoured between records/pages.
    fn produce(
        &self,
        entity_type: EntityType,
        config: &SourceConfig,
        cancel: CancellationToken,
    ) -> RecordStream;
}

/// Pick the adapter for a config: HTTP when a URI is set, synthetic otherwise.
pub fn adapter_for(config: &SourceConfig) -> Result<Box<dyn SourceAdapter>, SourceError> {
    match &config.source_uri {
        Some(uri) => Ok(Box::new(HttpSource::new(uri, config.request_timeout_secs)?)),
        None => Ok(Box::new(SyntheticSource)),
    }
}

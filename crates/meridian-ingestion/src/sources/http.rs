//! Paged HTTP JSON source.
//!
//! Fetches `GET {base}/{entity_type}?offset=N&limit=M`, expecting a JSON array
//! of flat objects per page. An empty (or short) page ends the stream. Pages
//! are fetched lazily as the consumer pulls records.

use std::time::Duration;

use meridian_common::{Attributes, EntityType, SourceRecord};
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::retry::{with_retry, Retried};
use super::{RecordStream, SourceAdapter, SourceConfig};
use crate::error::SourceError;

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(concat!("meridian/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch one page. Status codes are classified into transient/permanent.
    #[instrument(skip(self))]
    pub async fn fetch_page(
        &self,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Attributes>, SourceError> {
        let url = format!("{}/{}", self.base_url, entity_type.as_str());
        debug!(url = %url, offset, limit, "Fetching source page");

        let resp = self
            .client
            .get(&url)
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SourceError::Transient(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Permanent {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let body: Value = resp.json().await?;
        let Value::Array(items) = body else {
            return Err(SourceError::Decode(format!("{url}: expected a JSON array")));
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(SourceError::Decode(format!("{url}: expected object, got {other}"))),
            })
            .collect()
    }
}

impl SourceAdapter for HttpSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn produce(
        &self,
        entity_type: EntityType,
        config: &SourceConfig,
        cancel: CancellationToken,
    ) -> RecordStream {
        let source = self.clone();
        let target = config.target_count;
        let page_size = config.page_size.max(1);
        let retry = config.retry;
        let rate_limit = Duration::from_millis(config.rate_limit_ms);

        Box::pin(async_stream::stream! {
            let mut offset = 0usize;
            while offset < target {
                if offset > 0 && !rate_limit.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(rate_limit) => {}
                        _ = cancel.cancelled() => break,
                    }
                }

                let limit = page_size.min(target - offset);
                let what = format!("{entity_type} page @{offset}");
                let page = match with_retry(&retry, &cancel, &what, || source.fetch_page(entity_type, offset, limit)).await {
                    Ok(Retried::Done(page)) => page,
                    Ok(Retried::Cancelled) => break,
                    Err(e) => {
                        warn!(entity_type = %entity_type, offset, error = %e, "Source failed");
                        yield Err(e);
                        break;
                    }
                };

                let n = page.len();
                for fields in page.into_iter().take(target - offset) {
                    yield Ok(SourceRecord::new(entity_type, source.base_url.clone(), fields));
                }
                offset += n;
                if n < limit {
                    break;
                }
            }
        })
    }
}

//! Dual-store loader.
//!
//! Writes every `LoadBatch` to both stores of a `StoreSet`:
//!   1. Both stores are written concurrently; neither waits on the other.
//!   2. Per store, records are split into `chunk_size` sub-batches applied in order.
//!   3. Each sub-batch holds a lease on the store handle for its duration.
//!   4. Per-record failures are recorded and skipped; the sub-batch continues.
//!   5. A lost connection marks the store unavailable: the rest of the work for
//!      that store is counted failed without further I/O. The other store is
//!      unaffected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meridian_common::{ErrorKind, LoadBatch, Loadable, RecordError};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::pool::{StoreHandle, StoreSet};
use crate::schema::{StoreWriteResult, WriteOutcome};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LoaderConfig {
    pub chunk_size: usize,
    /// Fire the progress callback every this many processed store writes.
    pub progress_interval: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Running counters across both stores. Observational only.
#[derive(Debug, Default)]
pub struct LoadProgress {
    processed: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadProgressSnapshot {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl LoadProgress {
    /// Count one outcome. Returns the new processed total.
    fn tick(&self, outcome: &WriteOutcome) -> u64 {
        let counter = match outcome {
            WriteOutcome::Inserted    => &self.inserted,
            WriteOutcome::Updated     => &self.updated,
            WriteOutcome::Skipped(_)  => &self.skipped,
            WriteOutcome::Error(_)    => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn fail_many(&self, n: u64) -> u64 {
        self.failed.fetch_add(n, Ordering::Relaxed);
        self.processed.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn snapshot(&self) -> LoadProgressSnapshot {
        LoadProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(LoadProgressSnapshot) + Send + Sync>;

// ── Loader ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DualStoreLoader {
    stores: StoreSet,
    config: LoaderConfig,
    progress: Arc<LoadProgress>,
    on_progress: Option<ProgressCallback>,
}

impl DualStoreLoader {
    pub fn new(stores: StoreSet, config: LoaderConfig) -> Self {
        Self {
            stores,
            config: LoaderConfig {
                chunk_size: config.chunk_size.max(1),
                progress_interval: config.progress_interval.max(1),
            },
            progress: Arc::new(LoadProgress::default()),
            on_progress: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn progress(&self) -> LoadProgressSnapshot {
        self.progress.snapshot()
    }

    /// Write one batch to both stores. Returns `(primary, secondary)` results.
    #[instrument(skip(self, batch), fields(collection = %batch.collection, records = batch.len()))]
    pub async fn load_batch<R: Loadable>(
        &self,
        batch: &LoadBatch<R>,
    ) -> (StoreWriteResult, StoreWriteResult) {
        let (primary, secondary) = tokio::join!(
            self.write_store(&self.stores.primary, batch),
            self.write_store(&self.stores.secondary, batch),
        );
        debug!(
            primary_ok = primary.succeeded,
            primary_failed = primary.failed,
            secondary_ok = secondary.succeeded,
            secondary_failed = secondary.failed,
            "Batch loaded"
        );
        (primary, secondary)
    }

    async fn write_store<R: Loadable>(
        &self,
        handle: &StoreHandle,
        batch: &LoadBatch<R>,
    ) -> StoreWriteResult {
        let mut result = StoreWriteResult::new(handle.name());
        let total = batch.records.len();
        let mut done = 0usize;

        for chunk in batch.records.chunks(self.config.chunk_size) {
            if !handle.is_available() {
                break;
            }
            let lease = match handle.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    handle.mark_unavailable(&e.to_string());
                    break;
                }
            };

            for record in chunk {
                done += 1;
                let key = record.natural_key();

                let outcome = if record.collection() != batch.collection {
                    let msg = format!(
                        "record belongs to {} but was submitted in a {} batch",
                        record.collection(),
                        batch.collection
                    );
                    result.errors.push(RecordError::new(Some(&key), ErrorKind::Malformed, msg));
                    WriteOutcome::Error(ErrorKind::Malformed)
                } else {
                    match lease.upsert(batch.collection, &key, &record.attributes()).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let kind = e.kind();
                            if kind == ErrorKind::StoreUnavailable {
                                handle.mark_unavailable(&e.to_string());
                            } else {
                                warn!(store = handle.name(), key = %key, error = %e, "Record write failed");
                            }
                            result.errors.push(RecordError::new(Some(&key), kind, e.to_string()));
                            WriteOutcome::Error(kind)
                        }
                    }
                };

                result.record(&outcome);
                let processed = self.progress.tick(&outcome);
                self.maybe_report(processed, 1);

                if !handle.is_available() {
                    break;
                }
            }
        }

        let remaining = total - done;
        if remaining > 0 {
            result.failed += remaining as u64;
            result.errors.push(RecordError::new(
                None,
                ErrorKind::StoreUnavailable,
                format!("{} store unavailable: {remaining} remaining records not written", handle.role()),
            ));
            let processed = self.progress.fail_many(remaining as u64);
            self.maybe_report(processed, remaining as u64);
        }

        result
    }

    /// Fire the callback when `processed` crossed a multiple of the interval.
    fn maybe_report(&self, processed: u64, step: u64) {
        let Some(cb) = &self.on_progress else { return };
        let interval = self.config.progress_interval;
        if processed / interval != processed.saturating_sub(step) / interval {
            cb(self.progress.snapshot());
        }
    }
}

impl std::fmt::Debug for DualStoreLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualStoreLoader")
            .field("stores", &self.stores)
            .field("config", &self.config)
            .finish()
    }
}

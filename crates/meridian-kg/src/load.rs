//! Loading association streams through the dual-store loader.

use futures::stream::{BoxStream, StreamExt};
use meridian_common::{Association, Collection, LoadBatch};
use meridian_db::{DualStoreLoader, StoreWriteResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct AssociationLoad {
    pub generated: u64,
    pub primary: StoreWriteResult,
    pub secondary: StoreWriteResult,
    /// Cancellation stopped submission before the stream was drained.
    pub cancelled: bool,
}

/// Drain `stream` in batches of `batch_size`, writing each to both stores.
/// Cancellation is checked between batches; a submitted batch always finishes.
#[instrument(skip_all, fields(batch_size))]
pub async fn load_associations(
    loader: &DualStoreLoader,
    stream: BoxStream<'static, Association>,
    batch_size: usize,
    cancel: &CancellationToken,
) -> AssociationLoad {
    let stores = loader.stores();
    let mut load = AssociationLoad {
        generated: 0,
        primary: StoreWriteResult::new(stores.primary.name()),
        secondary: StoreWriteResult::new(stores.secondary.name()),
        cancelled: false,
    };

    let mut batches = stream.chunks(batch_size.max(1));
    while let Some(records) = batches.next().await {
        if cancel.is_cancelled() {
            load.cancelled = true;
            break;
        }
        load.generated += records.len() as u64;
        let batch = LoadBatch::new(Collection::Association, records);
        let (p, s) = loader.load_batch(&batch).await;
        debug!(generated = load.generated, "Association batch loaded");
        load.primary.merge(p);
        load.secondary.merge(s);
    }

    info!(
        generated = load.generated,
        primary = load.primary.succeeded,
        secondary = load.secondary.succeeded,
        cancelled = load.cancelled,
        "Associations loaded"
    );
    load
}

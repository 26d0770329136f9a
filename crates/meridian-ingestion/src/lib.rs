//! meridian-ingestion: Extraction, transformation and pipeline orchestration.
//!
//! Sources produce raw records per entity type, the transformer turns them
//! into canonical entities, and the pipeline drives both stores through the
//! dual-store loader before building associations and validating the result.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meridian_common::RunConfig;
//! use meridian_db::{MemoryStore, StoreSet};
//! use meridian_ingestion::run_pipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), meridian_ingestion::PipelineError> {
//! let stores = StoreSet::new(
//!     Arc::new(MemoryStore::new("primary")),
//!     Arc::new(MemoryStore::new("secondary")),
//! );
//! let report = run_pipeline(RunConfig::default(), stores, CancellationToken::new(), None).await?;
//! println!("{}", report.status);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod normalise;
pub mod pipeline;
pub mod report;
pub mod sources;

pub use error::{PipelineError, SourceError, TransformError};
pub use normalise::Transformer;
pub use pipeline::{run_pipeline, PipelineProgress};
pub use report::{AssociationReport, EntityTypeReport, RunReport, RunStatus, MAX_ERROR_SAMPLES};
pub use sources::{adapter_for, HttpSource, RecordStream, SourceAdapter, SourceConfig, SyntheticSource};

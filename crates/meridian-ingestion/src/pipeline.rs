//! End-to-end pipeline orchestration.
//!
//! One call runs a whole configuration:
//!   1. Validate the run configuration and build sources and mapping policies
//!      (any problem here is fatal, before any I/O)
//!   2. Ping both stores; abort if neither answers
//!   3. Run one worker per entity type, bounded by `parallelism`:
//!      source → transformer → batches → dual-store loader
//!   4. Build and load associations for each configured pair
//!   5. Validate both stores and decide the run status
//!   6. Emit progress events via broadcast channel
//!
//! The pipeline is non-destructive: per-record and per-store failures are
//! counted and reported, never raised.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use meridian_common::{
    CanonicalEntity, EntityType, ErrorKind, LoadBatch, MeridianError, RecordError, RunConfig,
};
use meridian_db::{DualStoreLoader, LoadProgressSnapshot, LoaderConfig, StoreSet};
use meridian_kg::{load_associations, AssociationBuilder, MappingPolicy, PairRequest};
use meridian_validate::{LoadTotals, Validator};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::normalise::Transformer;
use crate::report::{decide_status, AssociationReport, EntityTypeReport, RunReport, StatusInputs};
use crate::sources::{adapter_for, SourceAdapter, SourceConfig};

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a pipeline run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineProgress {
    pub run_id: Uuid,
    pub stage: String,
    pub entity_type: Option<String>,
    pub processed: u64,
    pub message: String,
}

impl PipelineProgress {
    fn new(run_id: Uuid, stage: &str, message: impl Into<String>) -> Self {
        Self {
            run_id,
            stage: stage.to_string(),
            entity_type: None,
            processed: 0,
            message: message.into(),
        }
    }

    fn for_type(mut self, entity_type: EntityType, processed: u64) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.processed = processed;
        self
    }
}

fn emit(tx: &Option<broadcast::Sender<PipelineProgress>>, progress: PipelineProgress) {
    if let Some(tx) = tx {
        let _ = tx.send(progress);
    }
}

// ── Run context ───────────────────────────────────────────────────────────────

struct RunContext<'a> {
    run_id: Uuid,
    config: &'a RunConfig,
    loader: &'a DualStoreLoader,
    transformer: &'a Transformer,
    cancel: &'a CancellationToken,
    progress_tx: &'a Option<broadcast::Sender<PipelineProgress>>,
}

/// A planned association pair, prepared before any I/O.
struct PreparedPlan {
    request: PairRequest,
    digest: Option<String>,
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

/// Runs the pipeline for one configuration.
///
/// Returns an error only for an invalid configuration or when both stores
/// are unavailable; everything else ends up in the report.
#[instrument(skip(config, stores, cancel, progress_tx))]
pub async fn run_pipeline(
    config: RunConfig,
    stores: StoreSet,
    cancel: CancellationToken,
    progress_tx: Option<broadcast::Sender<PipelineProgress>>,
) -> Result<RunReport, PipelineError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    // ── Configuration (no I/O against stores or sources yet) ──
    let entity_types = config.validate()?;
    let adapters = build_adapters(&config, &entity_types)?;
    let plans = prepare_plans(&config).await?;

    info!(
        run_id = %run_id,
        types = ?entity_types,
        parallelism = config.effective_parallelism(),
        associations = plans.len(),
        "Starting pipeline run"
    );
    emit(&progress_tx, PipelineProgress::new(run_id, "start", "Pipeline started"));

    if stores.ping_all().await == 0 {
        return Err(PipelineError::AllStoresUnavailable);
    }

    let loader = {
        let tx = progress_tx.clone();
        let loader = DualStoreLoader::new(
            stores.clone(),
            LoaderConfig {
                chunk_size: config.chunk_size,
                progress_interval: config.progress_interval,
            },
        );
        match tx {
            Some(tx) => loader.with_progress_callback(Arc::new(move |snap: LoadProgressSnapshot| {
                let mut p = PipelineProgress::new(run_id, "load", format!(
                    "{} inserted, {} updated, {} failed",
                    snap.inserted, snap.updated, snap.failed
                ));
                p.processed = snap.processed;
                let _ = tx.send(p);
            })),
            None => loader,
        }
    };
    let transformer = Transformer::new();
    let ctx = RunContext {
        run_id,
        config: &config,
        loader: &loader,
        transformer: &transformer,
        cancel: &cancel,
        progress_tx: &progress_tx,
    };

    // ── Entity workers ──
    let results: Vec<(EntityType, EntityTypeReport, LoadTotals)> = stream::iter(entity_types.iter().copied())
        .map(|t| {
            let adapter = &*adapters[&t];
            let ctx = &ctx;
            async move { run_entity_type(ctx, t, adapter).await }
        })
        .buffer_unordered(config.effective_parallelism())
        .collect()
        .await;

    if !stores.any_available() {
        warn!(run_id = %run_id, "Both stores became unavailable during loading");
        return Err(PipelineError::AllStoresUnavailable);
    }

    let mut per_entity_type = BTreeMap::new();
    let mut totals = LoadTotals::default();
    for (t, report, load) in results {
        totals.add(load.attempted, load.succeeded);
        per_entity_type.insert(t.to_string(), report);
    }

    // ── Associations ──
    let mut associations = Vec::with_capacity(plans.len());
    for plan in plans {
        let report = run_association_plan(&ctx, &stores, &per_entity_type, plan, &mut totals).await;
        associations.push(report);
    }

    // ── Validation ──
    emit(&progress_tx, PipelineProgress::new(run_id, "validate", "Validating stores"));
    let validation = Validator::new(stores.clone())
        .validate(&entity_types, totals, &cancel)
        .await;

    let cancelled = cancel.is_cancelled();
    let expected_records = entity_types.iter().any(|t| config.target_count_for(*t) > 0);
    let landed: u64 = per_entity_type
        .values()
        .map(|r: &EntityTypeReport| r.loaded_primary + r.loaded_secondary)
        .sum();
    let errors = per_entity_type.values().map(|r: &EntityTypeReport| r.errors).sum::<u64>()
        + associations.iter().map(|a: &AssociationReport| a.errors).sum::<u64>();
    let source_failures = per_entity_type.values().filter(|r: &&EntityTypeReport| r.source_failed).count();

    let status = decide_status(StatusInputs {
        expected_records,
        landed,
        errors,
        source_failures,
        cancelled,
        validation_clean: validation.is_clean(),
    });

    let report = RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        status,
        per_entity_type,
        associations,
        validation,
        cancelled,
    };

    info!(
        run_id        = %run_id,
        status        = %report.status,
        landed,
        errors,
        quality_score = report.validation.quality_score,
        cancelled,
        "Pipeline run complete"
    );
    emit(&progress_tx, PipelineProgress::new(run_id, "complete", format!("Run finished: {}", report.status)));

    Ok(report)
}

// ── Preparation ───────────────────────────────────────────────────────────────

fn build_adapters(
    config: &RunConfig,
    entity_types: &[EntityType],
) -> Result<HashMap<EntityType, Box<dyn SourceAdapter>>, PipelineError> {
    entity_types
        .iter()
        .map(|t| {
            let adapter = adapter_for(&SourceConfig::for_type(config, *t))
                .map_err(|e| MeridianError::FatalConfig(format!("{t} source: {e}")))?;
            Ok((*t, adapter))
        })
        .collect()
}

async fn prepare_plans(config: &RunConfig) -> Result<Vec<PreparedPlan>, PipelineError> {
    let mut plans = Vec::with_capacity(config.associations.len());
    for plan in &config.associations {
        let policy = MappingPolicy::from_spec(&plan.policy).await.map_err(|e| {
            MeridianError::FatalConfig(format!("association {}→{}: {e}", plan.from, plan.to))
        })?;
        let digest = match &policy {
            MappingPolicy::Curated(m) => m.digest().map(str::to_string),
            MappingPolicy::Heuristic(_) => None,
        };
        plans.push(PreparedPlan {
            request: PairRequest {
                from: plan.from_type()?,
                to: plan.to_type()?,
                relation: plan.relation.clone(),
                policy,
                fallback_heuristic: plan.fallback_heuristic,
            },
            digest,
        });
    }
    Ok(plans)
}

// ── Entity worker ─────────────────────────────────────────────────────────────

/// Extract, transform and load one entity type. Batches are submitted in order.
#[instrument(skip(ctx, adapter), fields(entity_type = %entity_type, source = adapter.name()))]
async fn run_entity_type(
    ctx: &RunContext<'_>,
    entity_type: EntityType,
    adapter: &dyn SourceAdapter,
) -> (EntityType, EntityTypeReport, LoadTotals) {
    let source_config = SourceConfig::for_type(ctx.config, entity_type);
    let batch_size = ctx.config.batch_size.max(1);
    let mut report = EntityTypeReport::default();
    let mut totals = LoadTotals::default();
    let mut pending: Vec<CanonicalEntity> = Vec::with_capacity(batch_size.min(source_config.target_count.max(1)));

    info!(target_count = source_config.target_count, "Entity worker started");
    let mut records = adapter.produce(entity_type, &source_config, ctx.cancel.clone());

    while let Some(item) = records.next().await {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Source failed, keeping records already extracted");
                report.source_failed = true;
                report.source_error = Some(e.to_string());
                break;
            }
        };
        report.extracted += 1;

        match ctx.transformer.transform(&record) {
            Ok(entity) => {
                report.transformed += 1;
                pending.push(entity);
            }
            Err(e) => {
                debug!(error = %e, "Record rejected by transformer");
                report.record_validation_error(e.to_record_error());
            }
        }

        if pending.len() >= batch_size
            && !submit(ctx, entity_type, &mut pending, &mut report, &mut totals).await
        {
            break;
        }
    }
    if !pending.is_empty() {
        submit(ctx, entity_type, &mut pending, &mut report, &mut totals).await;
    }

    info!(
        extracted     = report.extracted,
        transformed   = report.transformed,
        loaded_primary = report.loaded_primary,
        loaded_secondary = report.loaded_secondary,
        errors        = report.errors,
        source_failed = report.source_failed,
        "Entity worker finished"
    );
    (entity_type, report, totals)
}

/// Submit the pending batch. Returns `false` when the worker should stop:
/// the run was cancelled or no store is left to write to.
async fn submit(
    ctx: &RunContext<'_>,
    entity_type: EntityType,
    pending: &mut Vec<CanonicalEntity>,
    report: &mut EntityTypeReport,
    totals: &mut LoadTotals,
) -> bool {
    if ctx.cancel.is_cancelled() {
        info!(entity_type = %entity_type, dropped = pending.len(), "Cancelled, batch not submitted");
        pending.clear();
        return false;
    }
    if !ctx.loader.stores().any_available() {
        warn!(entity_type = %entity_type, "No store available, stopping worker");
        for entity in pending.drain(..) {
            report.errors += 1;
            if report.error_samples.len() < crate::report::MAX_ERROR_SAMPLES {
                report.error_samples.push(RecordError::new(
                    Some(&entity.natural_key),
                    ErrorKind::StoreUnavailable,
                    "no store available",
                ));
            }
        }
        return false;
    }

    let batch = LoadBatch::new(entity_type, std::mem::take(pending));
    let (primary, secondary) = ctx.loader.load_batch(&batch).await;
    totals.add(primary.attempted(), primary.succeeded);
    totals.add(secondary.attempted(), secondary.succeeded);
    report.record_writes(&primary, &secondary);

    emit(
        ctx.progress_tx,
        PipelineProgress::new(ctx.run_id, "batch", format!("{} records submitted", batch.len()))
            .for_type(entity_type, report.extracted),
    );
    !ctx.cancel.is_cancelled()
}

// ── Associations ──────────────────────────────────────────────────────────────

#[instrument(skip_all, fields(from = %plan.request.from, to = %plan.request.to))]
async fn run_association_plan(
    ctx: &RunContext<'_>,
    stores: &StoreSet,
    per_entity_type: &BTreeMap<String, EntityTypeReport>,
    plan: PreparedPlan,
    totals: &mut LoadTotals,
) -> AssociationReport {
    let request = plan.request;
    let mut report = AssociationReport {
        from: request.from.to_string(),
        to: request.to.to_string(),
        relation: request.relation(),
        policy: request.policy.label().to_string(),
        mapping_digest: plan.digest,
        ..Default::default()
    };

    let failed_endpoint = [request.from, request.to]
        .into_iter()
        .find(|t| per_entity_type.get(t.as_str()).is_some_and(|r| r.source_failed));
    if let Some(t) = failed_endpoint {
        warn!(entity_type = %t, "Skipping association plan, endpoint source failed");
        report.skipped = Some(format!("{t} source failed"));
        return report;
    }
    if ctx.cancel.is_cancelled() {
        report.skipped = Some("cancelled".into());
        return report;
    }

    emit(ctx.progress_tx, PipelineProgress::new(
        ctx.run_id,
        "associations",
        format!("Building {} → {}", report.from, report.to),
    ));

    let built = match AssociationBuilder::new(stores.clone()).build(&request).await {
        Ok(built) => built,
        Err(e) => {
            warn!(error = %e, "Association build failed");
            report.errors += 1;
            report.skipped = Some(format!("build failed: {e}"));
            return report;
        }
    };
    report.unresolved = built.stats.unresolved;
    report.fallback_used = built.stats.fallback_used;
    if built.stats.fallback_used {
        report.policy = built.stats.policy.clone();
    }

    let load = load_associations(ctx.loader, built.stream, ctx.config.batch_size, ctx.cancel).await;
    report.generated = load.generated;
    report.loaded_primary = load.primary.succeeded;
    report.loaded_secondary = load.secondary.succeeded;
    report.errors += load.primary.failed + load.secondary.failed;
    totals.add(load.primary.attempted(), load.primary.succeeded);
    totals.add(load.secondary.attempted(), load.secondary.succeeded);
    if load.cancelled {
        report.skipped = Some("cancelled".into());
    }
    report
}

//! Reconciliation validator.
//!
//! Read-only over both stores: every read goes through a lease, nothing is
//! written. A store that cannot be read is reported once as `StoreUnreadable`
//! and treated as empty for the rest of the validation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Utc;
use meridian_common::{Association, Collection, EntityType};
use meridian_db::{StoreHandle, StoreRole, StoreSet, StoredRecord};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::report::{
    CollectionSync, Issue, IssueKind, LoadTotals, ReferentialViolation, ValidationReport,
};
use crate::score::{compute_score, ScoreInputs};

#[derive(Debug, Clone)]
pub struct Validator {
    stores: StoreSet,
}

/// Mutable state for one validation pass.
#[derive(Default)]
struct Pass {
    unreadable: HashSet<StoreRole>,
    issues: Vec<Issue>,
    records_scanned: u64,
}

impl Validator {
    pub fn new(stores: StoreSet) -> Self {
        Self { stores }
    }

    /// Validate the given entity types plus the association collection.
    ///
    /// Counts are always compared. Referential and consistency checks are
    /// skipped once `cancel` fires, and listed in `skipped_checks`.
    #[instrument(skip(self, totals, cancel), fields(types = entity_types.len()))]
    pub async fn validate(
        &self,
        entity_types: &[EntityType],
        totals: LoadTotals,
        cancel: &CancellationToken,
    ) -> ValidationReport {
        let mut pass = Pass::default();

        // ── Sync ──
        let mut per_entity_type = BTreeMap::new();
        let collections = entity_types
            .iter()
            .map(|t| Collection::Entity(*t))
            .chain(std::iter::once(Collection::Association));
        for collection in collections {
            let p = self.count(&self.stores.primary, collection, &mut pass).await;
            let s = self.count(&self.stores.secondary, collection, &mut pass).await;
            let sync = CollectionSync::new(p, s);
            if sync.divergence > 0 {
                warn!(collection = %collection, primary = p, secondary = s, divergence = sync.divergence, "Store divergence");
            } else {
                debug!(collection = %collection, count = p, "Stores in sync");
            }
            per_entity_type.insert(collection.to_string(), sync);
        }

        let mut skipped_checks = Vec::new();

        // ── Referential ──
        let (referential_violations, associations_checked, violating) = if cancel.is_cancelled() {
            skipped_checks.push("referential".to_string());
            (Vec::new(), 0, 0)
        } else {
            self.check_referential(&mut pass).await
        };

        // ── Consistency ──
        if cancel.is_cancelled() {
            skipped_checks.push("consistency".to_string());
        } else {
            for entity_type in entity_types {
                for handle in self.stores.handles() {
                    self.check_consistency(handle, *entity_type, &mut pass).await;
                }
            }
        }

        // ── Score ──
        let inputs = ScoreInputs {
            total_divergence: per_entity_type.values().map(|s: &CollectionSync| s.divergence).sum(),
            total_expected: per_entity_type
                .values()
                .map(|s: &CollectionSync| s.primary_count.max(s.secondary_count))
                .sum(),
            violating_associations: violating,
            associations_checked,
            issues: pass.issues.len() as u64,
            records_scanned: pass.records_scanned,
            load: totals,
        };
        let score = compute_score(&inputs);
        let quality_score = score.total();

        info!(
            quality_score,
            divergence = inputs.total_divergence,
            violations = referential_violations.len(),
            issues = pass.issues.len(),
            "Validation complete"
        );

        ValidationReport {
            per_entity_type,
            referential_violations,
            consistency_issues: pass.issues,
            associations_checked,
            records_scanned: pass.records_scanned,
            load_totals: totals,
            score,
            quality_score,
            skipped_checks,
            validated_at: Utc::now(),
        }
    }

    async fn count(&self, handle: &StoreHandle, collection: Collection, pass: &mut Pass) -> u64 {
        if pass.unreadable.contains(&handle.role()) {
            return 0;
        }
        let result = match handle.acquire().await {
            Ok(lease) => lease.count(collection).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(n) => n,
            Err(e) => {
                self.mark_unreadable(handle, collection, e, pass);
                0
            }
        }
    }

    async fn scan(
        &self,
        handle: &StoreHandle,
        collection: Collection,
        pass: &mut Pass,
    ) -> Option<Vec<StoredRecord>> {
        if pass.unreadable.contains(&handle.role()) {
            return None;
        }
        let result = match handle.acquire().await {
            Ok(lease) => lease.scan(collection).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(rows) => Some(rows),
            Err(e) => {
                self.mark_unreadable(handle, collection, e, pass);
                None
            }
        }
    }

    fn mark_unreadable(&self, handle: &StoreHandle, collection: Collection, error: String, pass: &mut Pass) {
        if pass.unreadable.insert(handle.role()) {
            warn!(store = handle.name(), role = %handle.role(), error = %error, "Store unreadable during validation");
            pass.issues.push(Issue {
                store: handle.name().to_string(),
                collection: collection.to_string(),
                natural_key: None,
                kind: IssueKind::StoreUnreadable,
                detail: error,
            });
        }
    }

    /// Check every association found in either store against both stores.
    /// Returns `(violations, associations_checked, distinct violating associations)`.
    async fn check_referential(&self, pass: &mut Pass) -> (Vec<ReferentialViolation>, u64, u64) {
        let mut associations: BTreeMap<String, Association> = BTreeMap::new();
        for handle in self.stores.handles() {
            let Some(rows) = self.scan(handle, Collection::Association, pass).await else {
                continue;
            };
            for row in rows {
                match Association::from_attributes(&row.attributes) {
                    Some(a) => {
                        associations.entry(row.natural_key).or_insert(a);
                    }
                    None => pass.issues.push(Issue {
                        store: handle.name().to_string(),
                        collection: Collection::Association.to_string(),
                        natural_key: Some(row.natural_key),
                        kind: IssueKind::MalformedAssociation,
                        detail: "association attributes are incomplete".into(),
                    }),
                }
            }
        }

        // Endpoint keys grouped by type, checked once per store.
        let mut endpoints: BTreeMap<EntityType, BTreeSet<String>> = BTreeMap::new();
        for a in associations.values() {
            endpoints.entry(a.from_type).or_default().insert(a.from_key.clone());
            endpoints.entry(a.to_type).or_default().insert(a.to_key.clone());
        }

        let mut violations = Vec::new();
        let mut violating: BTreeSet<&str> = BTreeSet::new();
        for handle in self.stores.handles() {
            let Some(missing) = self.missing_endpoints(handle, &endpoints, pass).await else {
                continue;
            };
            for (key, a) in &associations {
                let gaps: Vec<(EntityType, String)> = [(a.from_type, &a.from_key), (a.to_type, &a.to_key)]
                    .into_iter()
                    .filter(|(t, k)| missing.get(t).is_some_and(|m| m.contains(*k)))
                    .map(|(t, k)| (t, k.clone()))
                    .collect();
                if !gaps.is_empty() {
                    violating.insert(key.as_str());
                    violations.push(ReferentialViolation {
                        association: a.clone(),
                        store: handle.name().to_string(),
                        missing: gaps,
                    });
                }
            }
        }

        if !violations.is_empty() {
            warn!(violations = violations.len(), "Orphan association references found");
        }
        let violating = violating.len() as u64;
        (violations, associations.len() as u64, violating)
    }

    async fn missing_endpoints(
        &self,
        handle: &StoreHandle,
        endpoints: &BTreeMap<EntityType, BTreeSet<String>>,
        pass: &mut Pass,
    ) -> Option<HashMap<EntityType, BTreeSet<String>>> {
        if pass.unreadable.contains(&handle.role()) {
            return None;
        }
        let mut missing = HashMap::new();
        for (entity_type, keys) in endpoints {
            let refs: Vec<String> = keys.iter().cloned().collect();
            let result = match handle.acquire().await {
                Ok(lease) => lease.check_foreign_keys(*entity_type, &refs).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match result {
                Ok(v) => {
                    missing.insert(*entity_type, v.into_iter().map(|v| v.natural_key).collect());
                }
                Err(e) => {
                    self.mark_unreadable(handle, Collection::Entity(*entity_type), e, pass);
                    return None;
                }
            }
        }
        Some(missing)
    }

    async fn check_consistency(&self, handle: &StoreHandle, entity_type: EntityType, pass: &mut Pass) {
        let collection = Collection::Entity(entity_type);
        let Some(rows) = self.scan(handle, collection, pass).await else {
            return;
        };
        pass.records_scanned += rows.len() as u64;

        let issue = |key: &str, kind: IssueKind, detail: String| Issue {
            store: handle.name().to_string(),
            collection: collection.to_string(),
            natural_key: Some(key.to_string()),
            kind,
            detail,
        };

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for row in &rows {
            *seen.entry(row.natural_key.as_str()).or_default() += 1;
        }
        let mut duplicates: Vec<(&str, usize)> = seen.into_iter().filter(|(_, n)| *n > 1).collect();
        duplicates.sort_unstable();
        for (key, n) in duplicates {
            pass.issues.push(issue(key, IssueKind::DuplicateKey, format!("{n} rows share this key")));
        }

        for row in &rows {
            if !entity_type.is_valid_key(&row.natural_key) {
                pass.issues.push(issue(
                    &row.natural_key,
                    IssueKind::InvalidIdentifier,
                    format!("does not match {}", entity_type.identifier_pattern().as_str()),
                ));
            }
            for field in entity_type.required_attributes() {
                if is_blank(row.attributes.get(*field)) {
                    pass.issues.push(issue(
                        &row.natural_key,
                        IssueKind::MissingRequired { field: field.to_string() },
                        format!("required field `{field}` is null"),
                    ));
                }
            }
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s))   => s.trim().is_empty(),
        Some(_)                  => false,
    }
}

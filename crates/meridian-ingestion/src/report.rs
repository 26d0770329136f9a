//! Run report artifact handed to the (external) report emitter.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meridian_common::RecordError;
use meridian_db::StoreWriteResult;
use meridian_validate::ValidationReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error samples kept per entity type; the counters stay exact.
pub const MAX_ERROR_SAMPLES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No errors, no divergence, nothing skipped.
    Success,
    /// Something failed or diverged, but at least one store holds usable data.
    Partial,
    /// No data landed anywhere and the run was not cancelled.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed  => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeReport {
    /// Raw records received from the source.
    pub extracted: u64,
    /// Records that became canonical entities.
    pub transformed: u64,
    pub validation_errors: u64,
    pub loaded_primary: u64,
    pub loaded_secondary: u64,
    /// Validation errors plus write failures on both stores.
    pub errors: u64,
    pub source_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub error_samples: Vec<RecordError>,
}

impl EntityTypeReport {
    pub fn record_validation_error(&mut self, error: RecordError) {
        self.validation_errors += 1;
        self.errors += 1;
        self.push_sample(error);
    }

    /// Fold one batch's write results into the report.
    pub fn record_writes(&mut self, primary: &StoreWriteResult, secondary: &StoreWriteResult) {
        self.loaded_primary += primary.succeeded;
        self.loaded_secondary += secondary.succeeded;
        self.errors += primary.failed + secondary.failed;
        for e in primary.errors.iter().chain(&secondary.errors) {
            self.push_sample(e.clone());
        }
    }

    fn push_sample(&mut self, error: RecordError) {
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(error);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssociationReport {
    pub from: String,
    pub to: String,
    pub relation: String,
    pub policy: String,
    pub generated: u64,
    pub unresolved: u64,
    pub loaded_primary: u64,
    pub loaded_secondary: u64,
    pub errors: u64,
    pub fallback_used: bool,
    /// Skipped because an endpoint type failed at its source, or the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub per_entity_type: BTreeMap<String, EntityTypeReport>,
    pub associations: Vec<AssociationReport>,
    pub validation: ValidationReport,
    pub cancelled: bool,
}

impl RunReport {
    pub fn total_errors(&self) -> u64 {
        self.per_entity_type.values().map(|r| r.errors).sum::<u64>()
            + self.associations.iter().map(|a| a.errors).sum::<u64>()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Inputs to the final status decision.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StatusInputs {
    pub expected_records: bool,
    pub landed: u64,
    pub errors: u64,
    pub source_failures: usize,
    pub cancelled: bool,
    pub validation_clean: bool,
}

pub(crate) fn decide_status(s: StatusInputs) -> RunStatus {
    if s.expected_records && s.landed == 0 && !s.cancelled {
        return RunStatus::Failed;
    }
    if s.errors == 0 && s.source_failures == 0 && !s.cancelled && s.validation_clean {
        RunStatus::Success
    } else {
        RunStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_common::ErrorKind;

    #[test]
    fn test_status_decision() {
        let clean = StatusInputs {
            expected_records: true,
            landed: 10,
            validation_clean: true,
            ..Default::default()
        };
        assert_eq!(decide_status(clean), RunStatus::Success);
        assert_eq!(decide_status(StatusInputs { errors: 1, ..clean }), RunStatus::Partial);
        assert_eq!(decide_status(StatusInputs { cancelled: true, ..clean }), RunStatus::Partial);
        assert_eq!(decide_status(StatusInputs { validation_clean: false, ..clean }), RunStatus::Partial);
        assert_eq!(decide_status(StatusInputs { landed: 0, errors: 3, ..clean }), RunStatus::Failed);
        assert_eq!(decide_status(StatusInputs { landed: 0, cancelled: true, ..clean }), RunStatus::Partial);
        assert_eq!(
            decide_status(StatusInputs { expected_records: false, landed: 0, ..clean }),
            RunStatus::Success
        );
    }

    #[test]
    fn test_error_samples_are_capped() {
        let mut r = EntityTypeReport::default();
        for i in 0..(MAX_ERROR_SAMPLES + 20) {
            r.record_validation_error(RecordError::new(None, ErrorKind::Validation, format!("e{i}")));
        }
        assert_eq!(r.errors, (MAX_ERROR_SAMPLES + 20) as u64);
        assert_eq!(r.error_samples.len(), MAX_ERROR_SAMPLES);
    }

    #[test]
    fn test_status_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&RunStatus::Partial).unwrap(), "\"partial\"");
    }
}

//! Composite quality score.
//!
//! Four axes of 25 points each. An axis whose denominator is empty scores
//! the full 25; the total is clamped to `[0, 100]`.

use crate::report::{LoadTotals, ScoreBreakdown};

pub const AXIS_POINTS: f64 = 25.0;

/// Inputs to the score, gathered by the validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub total_divergence: u64,
    /// Σ max(primary, secondary) over all collections.
    pub total_expected: u64,
    pub violating_associations: u64,
    pub associations_checked: u64,
    pub issues: u64,
    pub records_scanned: u64,
    pub load: LoadTotals,
}

pub fn compute_score(inputs: &ScoreInputs) -> ScoreBreakdown {
    let consistency = if inputs.records_scanned == 0 && inputs.issues > 0 {
        0.0
    } else {
        penalty_axis(inputs.issues, inputs.records_scanned)
    };

    ScoreBreakdown {
        sync: penalty_axis(inputs.total_divergence, inputs.total_expected),
        referential: penalty_axis(inputs.violating_associations, inputs.associations_checked),
        consistency,
        completeness: ratio_axis(inputs.load.succeeded, inputs.load.attempted),
    }
}

/// `25 · (1 − bad / total)`.
fn penalty_axis(bad: u64, total: u64) -> f64 {
    if total == 0 {
        return AXIS_POINTS;
    }
    (AXIS_POINTS * (1.0 - bad as f64 / total as f64)).clamp(0.0, AXIS_POINTS)
}

/// `25 · (good / total)`.
fn ratio_axis(good: u64, total: u64) -> f64 {
    if total == 0 {
        return AXIS_POINTS;
    }
    (AXIS_POINTS * (good as f64 / total as f64)).clamp(0.0, AXIS_POINTS)
}

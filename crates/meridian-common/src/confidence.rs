/// Confidence model for generated associations.

use serde::{Deserialize, Serialize};

/// Where an association's evidence comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Explicit row in a curated cross-reference table.
    CuratedMapping,
    /// Deterministic pairing used when no curated mapping exists.
    HeuristicAssignment,
}

impl EvidenceKind {
    pub const ALL: [EvidenceKind; 2] = [EvidenceKind::CuratedMapping, EvidenceKind::HeuristicAssignment];

    /// Base confidence weight for this evidence kind.
    pub fn base_weight(&self) -> f64 {
        match self {
            EvidenceKind::CuratedMapping      => 0.90,
            EvidenceKind::HeuristicAssignment => 0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::CuratedMapping      => "curated",
            EvidenceKind::HeuristicAssignment => "heuristic",
        }
    }
}

/// Aggregate confidence from multiple independent evidence rows
/// using the noisy-OR model: p = 1 - Π(1 - p_i)
pub fn aggregate_confidence(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }
    let product: f64 = confidences.iter().map(|&p| 1.0 - clamp_confidence(p)).product();
    1.0 - product
}

/// Clamp to [0.0, 1.0]; NaN becomes 0.0.
pub fn clamp_confidence(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) }
}

//! Multi-indicator arbitration
//!
//! Combines the deltas of every indicator governing a region into one knob
//! adjustment. Any starvation signal wins over slack signals; among slack
//! signals the smallest decrease wins.

use super::pid::{AdjustmentDelta, AdjustmentDirection};
use serde::{Deserialize, Serialize};

/// How simultaneous increase requests are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncreaseAggregation {
    /// Largest single increase
    #[default]
    Max,
    /// Sum of all increases
    Sum,
}

/// Final decision for a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    pub delta: f64,
    pub direction: AdjustmentDirection,
    /// Indicators whose delta determined the outcome
    pub decided_by: Vec<String>,
    /// A decrease was dropped because of reclaim overlap
    pub suppressed_by_overlap: bool,
}

impl ArbitrationOutcome {
    fn none() -> Self {
        Self {
            delta: 0.0,
            direction: AdjustmentDirection::None,
            decided_by: Vec::new(),
            suppressed_by_overlap: false,
        }
    }
}

/// Combine per-indicator deltas into one adjustment
pub fn combine(
    deltas: &[AdjustmentDelta],
    reclaim_overlap: bool,
    aggregation: IncreaseAggregation,
) -> ArbitrationOutcome {
    let increases: Vec<&AdjustmentDelta> = deltas.iter().filter(|d| d.delta > 0.0).collect();
    let decreases: Vec<&AdjustmentDelta> = deltas.iter().filter(|d| d.delta < 0.0).collect();

    if !increases.is_empty() {
        let (delta, decided_by) = match aggregation {
            IncreaseAggregation::Max => {
                let largest = increases
                    .iter()
                    .map(|d| d.delta)
                    .fold(0.0_f64, f64::max);
                let names = increases
                    .iter()
                    .filter(|d| d.delta == largest)
                    .map(|d| d.indicator.clone())
                    .collect();
                (largest, names)
            }
            IncreaseAggregation::Sum => (
                increases.iter().map(|d| d.delta).sum(),
                increases.iter().map(|d| d.indicator.clone()).collect(),
            ),
        };

        return ArbitrationOutcome {
            delta,
            direction: AdjustmentDirection::Increase,
            decided_by,
            suppressed_by_overlap: false,
        };
    }

    if decreases.is_empty() {
        return ArbitrationOutcome::none();
    }

    // Deltas are negative here, so the maximum is the smallest magnitude
    let smallest = decreases
        .iter()
        .map(|d| d.delta)
        .fold(f64::NEG_INFINITY, f64::max);
    let decided_by = decreases
        .iter()
        .filter(|d| d.delta == smallest)
        .map(|d| d.indicator.clone())
        .collect();

    if reclaim_overlap {
        return ArbitrationOutcome {
            delta: 0.0,
            direction: AdjustmentDirection::None,
            decided_by,
            suppressed_by_overlap: true,
        };
    }

    ArbitrationOutcome {
        delta: smallest,
        direction: AdjustmentDirection::Decrease,
        decided_by,
        suppressed_by_overlap: false,
    }
}

//! Combination counter (the explosion guard's prediction half).

use serde::Serialize;

use variantforge_core::{DomainError, DomainResult};

use crate::axis::{AxisKey, AxisKind, AxisSet};

/// Per-axis contribution to a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisBreakdown {
    pub key: AxisKey,
    pub label: String,
    pub kind: AxisKind,
    pub count: u64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountPrediction {
    pub total: u64,
    pub breakdown: Vec<AxisBreakdown>,
}

/// Product of value counts over active axes; `0` when no axis is active.
///
/// Saturates at `u64::MAX`, which is always above any ceiling.
pub fn predict_count(axes: &AxisSet) -> u64 {
    let mut active = axes.active_axes().peekable();
    if active.peek().is_none() {
        return 0;
    }
    active.fold(1u64, |acc, axis| acc.saturating_mul(axis.values.len() as u64))
}

/// Prediction plus the per-axis breakdown shown in previews.
pub fn predict(axes: &AxisSet) -> CountPrediction {
    let breakdown = axes
        .axes()
        .iter()
        .map(|axis| AxisBreakdown {
            key: axis.key.clone(),
            label: axis.label.clone(),
            kind: axis.kind.clone(),
            count: axis.values.len() as u64,
            active: axis.is_active(),
        })
        .collect();

    CountPrediction {
        total: predict_count(axes),
        breakdown,
    }
}

/// Fails with [`DomainError::Explosion`] when `predicted` exceeds `ceiling`.
pub fn ensure_within_ceiling(predicted: u64, ceiling: u64) -> DomainResult<u64> {
    if predicted > ceiling {
        return Err(DomainError::explosion(predicted, ceiling));
    }
    Ok(predicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisInput, RawAxis};
    use crate::normalize::normalize;

    fn axes(counts: &[usize]) -> AxisSet {
        let base = counts
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let ids: Vec<String> = (0..*n).map(|v| format!("v{v}")).collect();
                let pairs: Vec<(&str, &str)> =
                    ids.iter().map(|id| (id.as_str(), id.as_str())).collect();
                RawAxis::base(format!("axis{i}"), &pairs)
            })
            .collect();
        normalize(&AxisInput::new(base, vec![])).unwrap()
    }

    #[test]
    fn multiplies_active_axes() {
        assert_eq!(predict_count(&axes(&[2, 2])), 4);
        assert_eq!(predict_count(&axes(&[6, 5, 4, 4])), 480);
    }

    #[test]
    fn disabled_axes_do_not_zero_the_product() {
        assert_eq!(predict_count(&axes(&[3, 0, 2])), 6);
    }

    #[test]
    fn breakdown_lists_every_axis() {
        let prediction = predict(&axes(&[3, 0]));
        assert_eq!(prediction.total, 3);
        assert_eq!(prediction.breakdown.len(), 2);
        assert!(prediction.breakdown[0].active);
        assert!(!prediction.breakdown[1].active);
        assert_eq!(prediction.breakdown[1].count, 0);
    }

    #[test]
    fn ceiling_is_inclusive() {
        assert_eq!(ensure_within_ceiling(5_000, 5_000), Ok(5_000));
        assert_eq!(
            ensure_within_ceiling(1_000_000, 5_000),
            Err(DomainError::explosion(1_000_000, 5_000))
        );
    }

    #[test]
    fn product_past_u64_saturates_above_any_ceiling() {
        // 2^64 combinations
        let predicted = predict_count(&axes(&[2; 64]));
        assert_eq!(predicted, u64::MAX);
        assert!(ensure_within_ceiling(predicted, u64::MAX - 1).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: the prediction is the product of the non-empty axis sizes.
            #[test]
            fn prediction_is_product_of_active_axes(counts in prop::collection::vec(0usize..6, 1..5)) {
                prop_assume!(counts.iter().any(|n| *n > 0));
                let expected = counts
                    .iter()
                    .filter(|n| **n > 0)
                    .map(|n| *n as u64)
                    .reduce(|a, b| a * b)
                    .unwrap_or(0);
                prop_assert_eq!(predict_count(&axes(&counts)), expected);
            }

            /// Property: the guard rejects exactly the predictions above the ceiling.
            #[test]
            fn guard_rejects_only_above_ceiling(predicted in any::<u64>(), ceiling in any::<u64>()) {
                let guarded = ensure_within_ceiling(predicted, ceiling);
                prop_assert_eq!(guarded.is_err(), predicted > ceiling);
                if let Ok(value) = guarded {
                    prop_assert_eq!(value, predicted);
                }
            }
        }
    }
}

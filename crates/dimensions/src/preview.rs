//! Preview assembly: prediction, breakdown and a capped combination list.

use serde::Serialize;

use crate::axis::{AxisKey, AxisSet, ValueId};
use crate::counter::{AxisBreakdown, predict};
use crate::expander::CartesianExpander;
use crate::keys::CombinationKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinationPreview {
    pub combination_key: CombinationKey,
    pub label: String,
    pub values: Vec<(AxisKey, ValueId)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub predicted: u64,
    pub breakdown: Vec<AxisBreakdown>,
    /// `false` when a generate request for these axes would be rejected.
    pub within_ceiling: bool,
    pub combinations: Vec<CombinationPreview>,
    /// More combinations exist than were listed.
    pub truncated: bool,
}

/// Lists at most `limit` combinations; lists none when over `ceiling`.
pub fn build_preview(axes: &AxisSet, ceiling: u64, limit: usize) -> Preview {
    let prediction = predict(axes);
    let within_ceiling = prediction.total <= ceiling;

    let combinations: Vec<CombinationPreview> = if within_ceiling {
        CartesianExpander::new(axes)
            .take(limit)
            .map(|selection| CombinationPreview {
                combination_key: CombinationKey::from_selection(&selection),
                label: selection.display_label(),
                values: selection.value_ids(),
            })
            .collect()
    } else {
        Vec::new()
    };

    Preview {
        predicted: prediction.total,
        breakdown: prediction.breakdown,
        within_ceiling,
        truncated: (combinations.len() as u64) < prediction.total,
        combinations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisInput, RawAxis};
    use crate::normalize::normalize;

    fn axes() -> AxisSet {
        normalize(&AxisInput::new(
            vec![
                RawAxis::base("color", &[("red", "Red"), ("blue", "Blue")]),
                RawAxis::base("size", &[("s", "S"), ("m", "M")]),
            ],
            vec![],
        ))
        .unwrap()
    }

    #[test]
    fn caps_the_combination_list() {
        let preview = build_preview(&axes(), 100, 3);
        assert_eq!(preview.predicted, 4);
        assert_eq!(preview.combinations.len(), 3);
        assert!(preview.truncated);
        assert_eq!(preview.combinations[0].label, "Red / S");
    }

    #[test]
    fn full_list_is_not_truncated() {
        let preview = build_preview(&axes(), 100, 10);
        assert_eq!(preview.combinations.len(), 4);
        assert!(!preview.truncated);
    }

    #[test]
    fn over_ceiling_lists_nothing() {
        let preview = build_preview(&axes(), 3, 10);
        assert!(!preview.within_ceiling);
        assert!(preview.combinations.is_empty());
        assert_eq!(preview.predicted, 4);
    }
}

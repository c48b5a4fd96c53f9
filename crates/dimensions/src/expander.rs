//! Cartesian expander.
//!
//! Walks the cross-product as a mixed-radix counter over the active axes: the
//! first registered axis is the most significant digit, the last one varies
//! fastest. Nothing is materialized up front, and any position can be resumed
//! directly with [`CartesianExpander::starting_at`].

use variantforge_core::DomainResult;

use crate::axis::{AxisKey, AxisSet, DimensionAxis, DimensionValue, ValueId};
use crate::counter::{ensure_within_ceiling, predict_count};

/// One chosen value of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick<'a> {
    pub axis: &'a DimensionAxis,
    pub value: &'a DimensionValue,
    /// Zero-based index of `value` within its axis.
    pub position: usize,
}

/// One value per active axis, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    picks: Vec<Pick<'a>>,
}

impl<'a> Selection<'a> {
    pub fn picks(&self) -> &[Pick<'a>] {
        &self.picks
    }

    /// `(axis key, value id)` pairs in registration order.
    pub fn value_ids(&self) -> Vec<(AxisKey, ValueId)> {
        self.picks
            .iter()
            .map(|p| (p.axis.key.clone(), p.value.id.clone()))
            .collect()
    }

    /// Value labels joined for display, e.g. `Red / M`.
    pub fn display_label(&self) -> String {
        self.picks
            .iter()
            .map(|p| p.value.label.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Lazy, restartable iterator over every [`Selection`] of an [`AxisSet`].
#[derive(Debug, Clone)]
pub struct CartesianExpander<'a> {
    axes: Vec<&'a DimensionAxis>,
    cursor: Vec<usize>,
    position: u64,
    total: u64,
}

impl<'a> CartesianExpander<'a> {
    pub fn new(axes: &'a AxisSet) -> Self {
        Self::starting_at(axes, 0)
    }

    /// Resume at `position` (zero-based) without walking the earlier entries.
    pub fn starting_at(axes: &'a AxisSet, position: u64) -> Self {
        let active: Vec<&DimensionAxis> = axes.active_axes().collect();
        let total = predict_count(axes);

        let mut cursor = vec![0; active.len()];
        let mut rest = position;
        for (slot, axis) in cursor.iter_mut().zip(active.iter()).rev() {
            let radix = axis.values.len() as u64;
            *slot = (rest % radix) as usize;
            rest /= radix;
        }

        Self {
            axes: active,
            cursor,
            position: position.min(total),
            total,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn advance(&mut self) {
        for (slot, axis) in self.cursor.iter_mut().zip(self.axes.iter()).rev() {
            *slot += 1;
            if *slot < axis.values.len() {
                return;
            }
            *slot = 0;
        }
    }
}

impl<'a> Iterator for CartesianExpander<'a> {
    type Item = Selection<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.total {
            return None;
        }

        let picks = self
            .axes
            .iter()
            .zip(self.cursor.iter())
            .map(|(axis, &idx)| Pick {
                axis: *axis,
                value: &axis.values[idx],
                position: idx,
            })
            .collect();

        self.position += 1;
        self.advance();

        Some(Selection { picks })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.position;
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

// Exact as long as the total fits in `usize`, which the ceiling guarantees.
impl ExactSizeIterator for CartesianExpander<'_> {}

/// Check the ceiling, then hand out the expander.
pub fn expand(axes: &AxisSet, ceiling: u64) -> DomainResult<CartesianExpander<'_>> {
    ensure_within_ceiling(predict_count(axes), ceiling)?;
    Ok(CartesianExpander::new(axes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisInput, RawAxis};
    use crate::keys::CombinationKey;
    use crate::normalize::normalize;
    use variantforge_core::DomainError;

    fn color_size() -> AxisSet {
        normalize(&AxisInput::new(
            vec![
                RawAxis::base("color", &[("red", "Red"), ("blue", "Blue")]),
                RawAxis::base("size", &[("s", "S"), ("m", "M")]),
            ],
            vec![],
        ))
        .unwrap()
    }

    fn keys(exp: CartesianExpander<'_>) -> Vec<String> {
        exp.map(|s| CombinationKey::from_selection(&s).to_string())
            .collect()
    }

    #[test]
    fn last_axis_varies_fastest() {
        let axes = color_size();
        assert_eq!(
            keys(CartesianExpander::new(&axes)),
            vec!["red-s", "red-m", "blue-s", "blue-m"]
        );
    }

    #[test]
    fn resumes_mid_sequence() {
        let axes = color_size();
        let exp = CartesianExpander::starting_at(&axes, 2);
        assert_eq!(exp.len(), 2);
        assert_eq!(keys(exp), vec!["blue-s", "blue-m"]);

        let past_end = CartesianExpander::starting_at(&axes, 9);
        assert_eq!(past_end.count(), 0);
    }

    #[test]
    fn skips_disabled_axes() {
        let axes = normalize(&AxisInput::new(
            vec![
                RawAxis::base("color", &[("red", "Red")]),
                RawAxis::base("fit", &[("x", " ")]),
                RawAxis::base("size", &[("s", "S"), ("m", "M")]),
            ],
            vec![],
        ))
        .unwrap();

        let selections: Vec<_> = CartesianExpander::new(&axes).collect();
        assert_eq!(selections.len(), 2);
        assert!(selections.iter().all(|s| s.picks().len() == 2));
    }

    #[test]
    fn selection_exposes_ids_and_label() {
        let axes = color_size();
        let first = CartesianExpander::new(&axes).next().unwrap();
        assert_eq!(
            first.value_ids(),
            vec![
                (AxisKey::new("color"), ValueId::new("red")),
                (AxisKey::new("size"), ValueId::new("s")),
            ]
        );
        assert_eq!(first.display_label(), "Red / S");
    }

    #[test]
    fn expand_enforces_ceiling_before_iterating() {
        let axes = color_size();
        assert!(expand(&axes, 4).is_ok());
        assert!(matches!(
            expand(&axes, 3),
            Err(DomainError::Explosion { predicted: 4, ceiling: 3 })
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn axis_set(counts: &[usize]) -> AxisSet {
            let base = counts
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let labels: Vec<String> = (0..*n).map(|v| format!("a{i}v{v}")).collect();
                    let pairs: Vec<(&str, &str)> =
                        labels.iter().map(|l| (l.as_str(), l.as_str())).collect();
                    RawAxis::base(format!("axis{i}"), &pairs)
                })
                .collect();
            normalize(&AxisInput::new(base, vec![])).unwrap()
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: the counter's prediction equals the expander's length.
            #[test]
            fn prediction_matches_expansion(counts in prop::collection::vec(0usize..5, 1..5)) {
                prop_assume!(counts.iter().any(|n| *n > 0));
                let axes = axis_set(&counts);
                let predicted = predict_count(&axes);
                prop_assert_eq!(CartesianExpander::new(&axes).count() as u64, predicted);
            }

            /// Property: identical input yields an identical ordered key sequence.
            #[test]
            fn expansion_is_deterministic(counts in prop::collection::vec(1usize..4, 1..4)) {
                let first = keys(CartesianExpander::new(&axis_set(&counts)));
                let second = keys(CartesianExpander::new(&axis_set(&counts)));
                prop_assert_eq!(first, second);
            }

            /// Property: resuming at `n` yields the suffix of a full walk.
            #[test]
            fn resume_matches_suffix(counts in prop::collection::vec(1usize..4, 1..4), at in 0u64..64) {
                let axes = axis_set(&counts);
                let full = keys(CartesianExpander::new(&axes));
                let skip = (at as usize).min(full.len());
                let resumed = keys(CartesianExpander::starting_at(&axes, at));
                prop_assert_eq!(resumed, full[skip..].to_vec());
            }
        }
    }
}

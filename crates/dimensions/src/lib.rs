//! Dimension domain module.
//!
//! Everything here is pure and deterministic (no IO, no storage): axis
//! normalization, the combination counter, the cartesian expander, combination
//! keys / config hashes / SKUs, the structural diff and preview assembly.

pub mod axis;
pub mod counter;
pub mod diff;
pub mod expander;
pub mod keys;
pub mod normalize;
pub mod preview;
pub mod slug;

pub use axis::{
    AttributeId, AxisInput, AxisKey, AxisKind, AxisSet, DimensionAxis, DimensionValue, RawAxis,
    RawValue, Swatch, ValueId,
};
pub use counter::{AxisBreakdown, CountPrediction, ensure_within_ceiling, predict, predict_count};
pub use diff::{DimensionDiff, ValueChanges, diff_dimensions};
pub use expander::{CartesianExpander, Pick, Selection, expand};
pub use keys::{CombinationKey, ConfigHash, SkuBase};
pub use normalize::normalize;
pub use preview::{CombinationPreview, Preview, build_preview};
pub use slug::slugify;

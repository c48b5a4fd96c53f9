//! Structural diff between two axis sets (used for UI previews only).

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::axis::{AxisKey, AxisSet, DimensionAxis, ValueId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValueChanges {
    pub added: Vec<ValueId>,
    pub removed: Vec<ValueId>,
}

impl ValueChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DimensionDiff {
    /// Axes only present in `next`, in its registration order.
    pub added_keys: Vec<AxisKey>,
    /// Axes only present in `previous`, in its registration order.
    pub removed_keys: Vec<AxisKey>,
    /// Axes present in both whose value sets differ.
    pub modified_keys: BTreeMap<AxisKey, ValueChanges>,
}

impl DimensionDiff {
    pub fn is_empty(&self) -> bool {
        self.added_keys.is_empty() && self.removed_keys.is_empty() && self.modified_keys.is_empty()
    }
}

/// Compare two axis sets by axis key and value id. Pure, O(total values).
pub fn diff_dimensions(previous: &AxisSet, next: &AxisSet) -> DimensionDiff {
    let mut diff = DimensionDiff::default();

    for axis in next.axes() {
        if previous.get(&axis.key).is_none() {
            diff.added_keys.push(axis.key.clone());
        }
    }

    for old in previous.axes() {
        match next.get(&old.key) {
            None => diff.removed_keys.push(old.key.clone()),
            Some(new) => {
                let changes = value_changes(old, new);
                if !changes.is_empty() {
                    diff.modified_keys.insert(old.key.clone(), changes);
                }
            }
        }
    }

    diff
}

fn value_changes(old: &DimensionAxis, new: &DimensionAxis) -> ValueChanges {
    let old_ids: HashSet<&ValueId> = old.values.iter().map(|v| &v.id).collect();
    let new_ids: HashSet<&ValueId> = new.values.iter().map(|v| &v.id).collect();

    ValueChanges {
        added: new
            .values
            .iter()
            .filter(|v| !old_ids.contains(&v.id))
            .map(|v| v.id.clone())
            .collect(),
        removed: old
            .values
            .iter()
            .filter(|v| !new_ids.contains(&v.id))
            .map(|v| v.id.clone())
            .collect(),
    }
}

//! Dimension normalizer: raw axis input → validated [`AxisSet`].
//!
//! Runs before anything touches storage. Every rejection is a
//! [`DomainError::Validation`].

use std::collections::HashSet;

use variantforge_core::{DomainError, DomainResult};

use crate::axis::{
    AttributeId, AxisInput, AxisKey, AxisKind, AxisSet, DimensionAxis, DimensionValue, RawAxis,
    RawValue, ValueId,
};
use crate::slug::slugify;

/// Canonicalize a request's axes.
///
/// Base axes are registered first, then attribute axes, each in request order.
/// Axes left without usable values are kept but disabled.
pub fn normalize(input: &AxisInput) -> DomainResult<AxisSet> {
    let mut axes = Vec::with_capacity(input.base.len() + input.attributes.len());
    let mut seen_keys: HashSet<AxisKey> = HashSet::new();
    let mut seen_attributes: HashSet<AttributeId> = HashSet::new();

    for (idx, raw) in input.base.iter().enumerate() {
        let key = trimmed(raw.key.as_deref())
            .map(|k| AxisKey::new(k.to_lowercase()))
            .ok_or_else(|| DomainError::validation(format!("base axis #{idx} is missing a key")))?;
        let axis = normalize_axis(raw, key, AxisKind::Base)?;
        register(&mut axes, &mut seen_keys, axis)?;
    }

    for (idx, raw) in input.attributes.iter().enumerate() {
        let attribute_id = trimmed(raw.attribute_id.as_deref())
            .map(AttributeId::from)
            .ok_or_else(|| {
                DomainError::validation(format!("attribute axis #{idx} is missing an attribute id"))
            })?;

        if !seen_attributes.insert(attribute_id.clone()) {
            return Err(DomainError::validation(format!(
                "attribute axis {attribute_id} appears more than once"
            )));
        }

        let key = match trimmed(raw.key.as_deref()) {
            Some(k) => AxisKey::new(k.to_lowercase()),
            None => AxisKey::new(format!("attr-{}", slugify(attribute_id.as_str()))),
        };
        let axis = normalize_axis(raw, key, AxisKind::Attribute { attribute_id })?;
        register(&mut axes, &mut seen_keys, axis)?;
    }

    let set = AxisSet::from_normalized(axes);
    if set.selected_value_count() == 0 {
        return Err(DomainError::validation("no axis values selected"));
    }

    Ok(set)
}

fn register(
    axes: &mut Vec<DimensionAxis>,
    seen_keys: &mut HashSet<AxisKey>,
    axis: DimensionAxis,
) -> DomainResult<()> {
    if !seen_keys.insert(axis.key.clone()) {
        return Err(DomainError::validation(format!(
            "axis key {} appears more than once",
            axis.key
        )));
    }
    axes.push(axis);
    Ok(())
}

fn normalize_axis(raw: &RawAxis, key: AxisKey, kind: AxisKind) -> DomainResult<DimensionAxis> {
    let label = trimmed(raw.label.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| key.to_string());

    let mut values = Vec::with_capacity(raw.values.len());
    let mut seen_ids: HashSet<ValueId> = HashSet::new();
    let mut seen_slugs: HashSet<String> = HashSet::new();

    for (idx, raw_value) in raw.values.iter().enumerate() {
        let id = trimmed(raw_value.id.as_deref()).map(ValueId::from).ok_or_else(|| {
            DomainError::validation(format!("value #{idx} of axis {key} is missing an id"))
        })?;

        if !seen_ids.insert(id.clone()) {
            return Err(DomainError::validation(format!(
                "value {id} appears more than once in axis {key}"
            )));
        }

        let Some(value) = normalize_value(raw_value, id) else {
            continue;
        };

        // Equal slugs would yield equal combination keys for distinct combinations.
        if !seen_slugs.insert(value.slug.clone()) {
            return Err(DomainError::validation(format!(
                "values of axis {key} collide on slug {}",
                value.slug
            )));
        }

        values.push(value);
    }

    let disabled = values.is_empty();

    Ok(DimensionAxis {
        key,
        label,
        kind,
        values,
        disabled,
    })
}

/// `None` when the value has no usable label.
fn normalize_value(raw: &RawValue, id: ValueId) -> Option<DimensionValue> {
    let label = trimmed(raw.label.as_deref())?.to_string();

    let slug = raw
        .slug
        .as_deref()
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(&label));
    let slug = if slug.is_empty() {
        slugify(id.as_str())
    } else {
        slug
    };
    if slug.is_empty() {
        return None;
    }

    Some(DimensionValue {
        id,
        label,
        slug,
        swatch: raw.swatch.clone(),
    })
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

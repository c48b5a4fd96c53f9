use serde::{Deserialize, Serialize};

macro_rules! impl_string_newtype {
    ($t:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

impl_string_newtype!(AxisKey);
impl_string_newtype!(ValueId);
impl_string_newtype!(AttributeId);

/// Closed set of axis kinds.
///
/// Base axes (color, size) are built into the catalog; attribute axes are
/// admin-defined and always carry the attribute they were registered from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisKind {
    Base,
    Attribute { attribute_id: AttributeId },
}

/// Optional presentation metadata for a value (color chip or image).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Swatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// One normalized value of an axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionValue {
    pub id: ValueId,
    pub label: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swatch: Option<Swatch>,
}

/// One normalized axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionAxis {
    pub key: AxisKey,
    pub label: String,
    pub kind: AxisKind,
    pub values: Vec<DimensionValue>,
    pub disabled: bool,
}

impl DimensionAxis {
    /// Active axes take part in counting and expansion.
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.values.is_empty()
    }

    pub fn attribute_id(&self) -> Option<&AttributeId> {
        match &self.kind {
            AxisKind::Base => None,
            AxisKind::Attribute { attribute_id } => Some(attribute_id),
        }
    }
}

/// A normalized, validated set of axes in registration order.
///
/// Only the normalizer builds these, so every `AxisSet` in circulation has
/// already passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AxisSet {
    axes: Vec<DimensionAxis>,
}

impl AxisSet {
    pub(crate) fn from_normalized(axes: Vec<DimensionAxis>) -> Self {
        Self { axes }
    }

    /// All axes (including disabled ones) in registration order.
    pub fn axes(&self) -> &[DimensionAxis] {
        &self.axes
    }

    /// Axes that participate in expansion, in registration order.
    pub fn active_axes(&self) -> impl Iterator<Item = &DimensionAxis> {
        self.axes.iter().filter(|a| a.is_active())
    }

    pub fn get(&self, key: &AxisKey) -> Option<&DimensionAxis> {
        self.axes.iter().find(|a| &a.key == key)
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of usable values across all active axes.
    pub fn selected_value_count(&self) -> usize {
        self.active_axes().map(|a| a.values.len()).sum()
    }

    /// `(attribute, value)` pairs of every attribute axis, for scope checks.
    pub fn attribute_values(&self) -> Vec<(AttributeId, ValueId)> {
        self.active_axes()
            .filter_map(|axis| axis.attribute_id().map(|attr| (attr, axis)))
            .flat_map(|(attr, axis)| {
                axis.values
                    .iter()
                    .map(move |v| (attr.clone(), v.id.clone()))
            })
            .collect()
    }
}

/// Raw, unvalidated value as submitted by the back office.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawValue {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub swatch: Option<Swatch>,
}

impl RawValue {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_swatch(mut self, swatch: Swatch) -> Self {
        self.swatch = Some(swatch);
        self
    }
}

/// Raw, unvalidated axis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawAxis {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub attribute_id: Option<String>,
    #[serde(default)]
    pub values: Vec<RawValue>,
}

impl RawAxis {
    /// Base axis whose values are `(id, label)` pairs.
    pub fn base(key: impl Into<String>, values: &[(&str, &str)]) -> Self {
        Self {
            key: Some(key.into()),
            label: None,
            attribute_id: None,
            values: values.iter().map(|(id, label)| RawValue::new(*id, *label)).collect(),
        }
    }

    /// Attribute axis whose values are `(id, label)` pairs.
    pub fn attribute(
        attribute_id: impl Into<String>,
        label: impl Into<String>,
        values: &[(&str, &str)],
    ) -> Self {
        Self {
            key: None,
            label: Some(label.into()),
            attribute_id: Some(attribute_id.into()),
            values: values.iter().map(|(id, label)| RawValue::new(*id, *label)).collect(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Raw request payload: built-in axes followed by attribute axes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisInput {
    #[serde(default)]
    pub base: Vec<RawAxis>,
    #[serde(default)]
    pub attributes: Vec<RawAxis>,
}

impl AxisInput {
    pub fn new(base: Vec<RawAxis>, attributes: Vec<RawAxis>) -> Self {
        Self { base, attributes }
    }
}

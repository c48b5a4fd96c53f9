//! Collaborators owned by other parts of the catalog: the category-scope
//! validator and the inventory initializer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use variantforge_core::{ProductGroupId, VariantId};
use variantforge_dimensions::{AttributeId, ValueId};

use crate::stores::VariantRecord;

/// Rejection from the category-scope validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attribute {attribute_id} value {value_id} is outside the category scope: {reason}")]
pub struct ScopeRejection {
    pub attribute_id: AttributeId,
    pub value_id: ValueId,
    pub reason: String,
}

/// Checks that the attribute values requested for a product group are allowed
/// by its category.
pub trait CategoryScopeValidator: Send + Sync {
    fn validate(
        &self,
        product_group_id: ProductGroupId,
        attribute_values: &[(AttributeId, ValueId)],
    ) -> Result<(), ScopeRejection>;
}

impl<V> CategoryScopeValidator for Arc<V>
where
    V: CategoryScopeValidator + ?Sized,
{
    fn validate(
        &self,
        product_group_id: ProductGroupId,
        attribute_values: &[(AttributeId, ValueId)],
    ) -> Result<(), ScopeRejection> {
        (**self).validate(product_group_id, attribute_values)
    }
}

/// Validator that allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllScope;

impl CategoryScopeValidator for AcceptAllScope {
    fn validate(&self, _: ProductGroupId, _: &[(AttributeId, ValueId)]) -> Result<(), ScopeRejection> {
        Ok(())
    }
}

/// Fixed allow-list of values per attribute. Attributes not listed are unrestricted.
#[derive(Debug, Default, Clone)]
pub struct StaticScope {
    allowed: HashMap<AttributeId, HashSet<ValueId>>,
}

impl StaticScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, attribute_id: &str, values: &[&str]) -> Self {
        self.allowed
            .entry(AttributeId::new(attribute_id))
            .or_default()
            .extend(values.iter().map(|v| ValueId::new(*v)));
        self
    }
}

impl CategoryScopeValidator for StaticScope {
    fn validate(
        &self,
        _: ProductGroupId,
        attribute_values: &[(AttributeId, ValueId)],
    ) -> Result<(), ScopeRejection> {
        for (attribute_id, value_id) in attribute_values {
            let Some(allowed) = self.allowed.get(attribute_id) else {
                continue;
            };
            if !allowed.contains(value_id) {
                return Err(ScopeRejection {
                    attribute_id: attribute_id.clone(),
                    value_id: value_id.clone(),
                    reason: "value not allowed for this category".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("inventory initialization failed for variant {variant_id}: {reason}")]
pub struct InventoryError {
    pub variant_id: VariantId,
    pub reason: String,
}

/// Creates the stock record of a newly generated variant.
///
/// Called once per created variant after the batch has passed its last
/// cancellation point and before it commits; an error aborts the batch.
/// If the batch does not commit, every variant initialized for it is handed
/// back through [`discard`](Self::discard).
pub trait InventoryInitializer: Send + Sync {
    fn initialize(&self, variant: &VariantRecord) -> Result<(), InventoryError>;

    /// Undo `initialize` for a variant whose batch was rolled back.
    fn discard(&self, variant_id: VariantId) -> Result<(), InventoryError>;
}

impl<I> InventoryInitializer for Arc<I>
where
    I: InventoryInitializer + ?Sized,
{
    fn initialize(&self, variant: &VariantRecord) -> Result<(), InventoryError> {
        (**self).initialize(variant)
    }

    fn discard(&self, variant_id: VariantId) -> Result<(), InventoryError> {
        (**self).discard(variant_id)
    }
}

/// Initializer that remembers which variants it was called for.
#[derive(Debug, Default)]
pub struct RecordingInventory {
    initialized: Mutex<Vec<VariantId>>,
}

impl RecordingInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialized(&self) -> Vec<VariantId> {
        self.initialized
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

impl InventoryInitializer for RecordingInventory {
    fn initialize(&self, variant: &VariantRecord) -> Result<(), InventoryError> {
        let mut ids = self.initialized.lock().map_err(|_| InventoryError {
            variant_id: variant.id,
            reason: "inventory lock poisoned".to_string(),
        })?;
        ids.push(variant.id);
        Ok(())
    }

    fn discard(&self, variant_id: VariantId) -> Result<(), InventoryError> {
        let mut ids = self.initialized.lock().map_err(|_| InventoryError {
            variant_id,
            reason: "inventory lock poisoned".to_string(),
        })?;
        ids.retain(|id| *id != variant_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_scope_rejects_values_outside_allow_list() {
        let scope = StaticScope::new().allow("ram", &["r8", "r16"]);
        let group = ProductGroupId::new();

        let ok = vec![
            (AttributeId::new("ram"), ValueId::new("r16")),
            (AttributeId::new("storage"), ValueId::new("anything")),
        ];
        assert!(scope.validate(group, &ok).is_ok());

        let bad = vec![(AttributeId::new("ram"), ValueId::new("r64"))];
        let err = scope.validate(group, &bad).unwrap_err();
        assert_eq!(err.value_id, ValueId::new("r64"));
    }
}

//! Idempotent batch persistence.
//!
//! Each selection is written create-if-absent, keyed by its config hash, inside
//! one transaction per batch. Any failure drops the transaction, so an aborted
//! batch leaves no variants behind, and no stock records either.

use std::sync::Arc;

use variantforge_core::{BatchId, ProductGroupId, VariantId};
use variantforge_dimensions::{AxisSet, CombinationKey, ConfigHash, SkuBase, expand};

use crate::collaborators::InventoryInitializer;
use crate::error::GenerationError;
use crate::stores::{InsertOutcome, VariantDraft, VariantRecord, VariantStore};

/// Cooperative cancellation point, consulted before every write.
pub trait ExecutionGuard {
    fn checkpoint(&self, processed: u64, total: u64) -> Result<(), GenerationError>;
}

/// Inline execution: no deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unguarded;

impl ExecutionGuard for Unguarded {
    fn checkpoint(&self, _: u64, _: u64) -> Result<(), GenerationError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub created: Vec<VariantRecord>,
    pub skipped: u64,
    pub race_duplicates: u64,
}

impl PersistOutcome {
    pub fn generated(&self) -> u64 {
        self.created.len() as u64
    }
}

pub struct VariantPersister {
    variants: Arc<dyn VariantStore>,
    inventory: Arc<dyn InventoryInitializer>,
}

impl VariantPersister {
    pub fn new(variants: Arc<dyn VariantStore>, inventory: Arc<dyn InventoryInitializer>) -> Self {
        Self {
            variants,
            inventory,
        }
    }

    pub fn persist(
        &self,
        product_group_id: ProductGroupId,
        batch_id: BatchId,
        axes: &AxisSet,
        sku_base: &SkuBase,
        ceiling: u64,
        guard: &dyn ExecutionGuard,
    ) -> Result<PersistOutcome, GenerationError> {
        let selections = expand(axes, ceiling)?;
        let total = selections.total();
        let mut tx = self.variants.begin(product_group_id)?;
        let mut outcome = PersistOutcome::default();

        for (processed, selection) in selections.enumerate() {
            guard.checkpoint(processed as u64, total)?;

            let config_hash = ConfigHash::compute(product_group_id, &selection);
            if tx.find_active(&config_hash)?.is_some() {
                outcome.skipped += 1;
                continue;
            }

            let draft = VariantDraft {
                product_group_id,
                batch_id,
                combination_key: CombinationKey::from_selection(&selection),
                config_hash,
                values: selection.value_ids(),
                sku: sku_base.sku_for(&selection),
                label: selection.display_label(),
                price: None,
                stock: 0,
                barcode: None,
            };

            match tx.insert(draft)? {
                InsertOutcome::Inserted(record) => outcome.created.push(record),
                InsertOutcome::Duplicate => {
                    tracing::debug!(
                        product_group_id = %product_group_id,
                        batch_id = %batch_id,
                        "combination created concurrently; counted as race duplicate"
                    );
                    outcome.race_duplicates += 1;
                }
            }
        }

        guard.checkpoint(total, total)?;

        // nothing below is cancellable; stock records exist only for committed rows
        let mut initialized = Vec::with_capacity(outcome.created.len());
        for record in &outcome.created {
            if let Err(e) = self.inventory.initialize(record) {
                self.discard_inventory(batch_id, &initialized);
                return Err(e.into());
            }
            initialized.push(record.id);
        }

        match tx.commit() {
            Ok(committed) => {
                outcome.created = committed;
                Ok(outcome)
            }
            Err(e) => {
                self.discard_inventory(batch_id, &initialized);
                Err(e.into())
            }
        }
    }

    fn discard_inventory(&self, batch_id: BatchId, variant_ids: &[VariantId]) {
        for variant_id in variant_ids {
            if let Err(e) = self.inventory.discard(*variant_id) {
                tracing::warn!(
                    batch_id = %batch_id,
                    variant_id = %variant_id,
                    error = %e,
                    "could not discard stock record of rolled-back variant"
                );
            }
        }
    }
}

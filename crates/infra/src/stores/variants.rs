use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use variantforge_core::{BatchId, ProductGroupId, VariantId};
use variantforge_dimensions::{AxisKey, CombinationKey, ConfigHash, ValueId};

/// A variant about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDraft {
    pub product_group_id: ProductGroupId,
    pub batch_id: BatchId,
    pub combination_key: CombinationKey,
    pub config_hash: ConfigHash,
    /// Chosen value per axis, in registration order.
    pub values: Vec<(AxisKey, ValueId)>,
    pub sku: String,
    pub label: String,
    /// Placeholders; pricing and stock are managed elsewhere.
    pub price: Option<u64>,
    pub stock: u64,
    pub barcode: Option<String>,
}

/// A persisted variant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub id: VariantId,
    #[serde(flatten)]
    pub draft: VariantDraft,
    pub created_at: DateTime<Utc>,
    /// Archived rows no longer hold their combination.
    pub archived_at: Option<DateTime<Utc>>,
}

impl VariantRecord {
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

/// Result of a single insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(VariantRecord),
    /// Rejected by the `(product group, config hash)` uniqueness constraint.
    Duplicate,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("variant store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Variant persistence.
///
/// Uniqueness on `(product_group_id, config_hash)` among active rows is
/// enforced by the store itself, including across concurrent transactions.
pub trait VariantStore: Send + Sync {
    /// Open a transaction scoped to one product group.
    fn begin(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Box<dyn VariantTransaction + '_>, StoreError>;

    fn list_active(&self, product_group_id: ProductGroupId)
        -> Result<Vec<VariantRecord>, StoreError>;

    /// Archive every active variant of the group created by `batch_id`;
    /// returns how many.
    fn archive_batch(
        &self,
        product_group_id: ProductGroupId,
        batch_id: BatchId,
    ) -> Result<u64, StoreError>;
}

/// Unit of work over one product group.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it back.
pub trait VariantTransaction {
    /// Active variant holding `hash`, committed or written earlier in this transaction.
    fn find_active(&self, hash: &ConfigHash) -> Result<Option<VariantId>, StoreError>;

    fn insert(&mut self, draft: VariantDraft) -> Result<InsertOutcome, StoreError>;

    fn commit(self: Box<Self>) -> Result<Vec<VariantRecord>, StoreError>;
}

impl<S> VariantStore for Arc<S>
where
    S: VariantStore + ?Sized,
{
    fn begin(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Box<dyn VariantTransaction + '_>, StoreError> {
        (**self).begin(product_group_id)
    }

    fn list_active(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<VariantRecord>, StoreError> {
        (**self).list_active(product_group_id)
    }

    fn archive_batch(
        &self,
        product_group_id: ProductGroupId,
        batch_id: BatchId,
    ) -> Result<u64, StoreError> {
        (**self).archive_batch(product_group_id, batch_id)
    }
}

type UniqueKey = (ProductGroupId, ConfigHash);

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<VariantId, VariantRecord>,
    /// Unique index over active rows.
    active: HashMap<UniqueKey, VariantId>,
    /// Keys claimed by open transactions, with the claiming transaction.
    reserved: HashMap<UniqueKey, u64>,
}

/// How long an insert waits on a key claimed by another open transaction.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory variant store for tests/dev.
///
/// Behaves like a unique index with row locks: an insert that meets a key
/// claimed by another open transaction blocks until that transaction commits
/// (the insert is then a duplicate) or rolls back (the insert proceeds).
#[derive(Debug)]
pub struct InMemoryVariantStore {
    tables: Mutex<Tables>,
    released: Condvar,
    next_tx: AtomicU64,
    lock_timeout: Duration,
}

impl Default for InMemoryVariantStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryVariantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            released: Condvar::new(),
            next_tx: AtomicU64::new(1),
            lock_timeout,
        }
    }

    /// Every row ever written, archived ones included.
    pub fn all_rows(&self) -> Vec<VariantRecord> {
        match self.tables.lock() {
            Ok(tables) => tables.rows.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn release(&self, keys: impl Iterator<Item = UniqueKey>) {
        if let Ok(mut tables) = self.tables.lock() {
            for key in keys {
                tables.reserved.remove(&key);
            }
        }
        self.released.notify_all();
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Storage("variant store lock poisoned".to_string())
}

impl VariantStore for InMemoryVariantStore {
    fn begin(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Box<dyn VariantTransaction + '_>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            store: self,
            serial: self.next_tx.fetch_add(1, Ordering::Relaxed),
            product_group_id,
            pending: Vec::new(),
            committed: false,
        }))
    }

    fn list_active(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<VariantRecord>, StoreError> {
        let tables = self.tables.lock().map_err(poisoned)?;
        let mut rows: Vec<VariantRecord> = tables
            .rows
            .values()
            .filter(|r| r.draft.product_group_id == product_group_id && r.is_active())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn archive_batch(
        &self,
        product_group_id: ProductGroupId,
        batch_id: BatchId,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().map_err(poisoned)?;
        let Tables { rows, active, .. } = &mut *tables;
        let now = Utc::now();
        let mut archived = 0;

        for row in rows.values_mut() {
            let draft = &row.draft;
            if draft.product_group_id != product_group_id
                || draft.batch_id != batch_id
                || !row.is_active()
            {
                continue;
            }
            row.archived_at = Some(now);
            active.remove(&(row.draft.product_group_id, row.draft.config_hash.clone()));
            archived += 1;
        }

        Ok(archived)
    }
}

struct InMemoryTransaction<'a> {
    store: &'a InMemoryVariantStore,
    serial: u64,
    product_group_id: ProductGroupId,
    pending: Vec<VariantRecord>,
    committed: bool,
}

impl InMemoryTransaction<'_> {
    fn key(&self, hash: &ConfigHash) -> UniqueKey {
        (self.product_group_id, hash.clone())
    }
}

impl VariantTransaction for InMemoryTransaction<'_> {
    fn find_active(&self, hash: &ConfigHash) -> Result<Option<VariantId>, StoreError> {
        if let Some(own) = self.pending.iter().find(|r| &r.draft.config_hash == hash) {
            return Ok(Some(own.id));
        }
        let tables = self.store.tables.lock().map_err(poisoned)?;
        Ok(tables.active.get(&self.key(hash)).copied())
    }

    fn insert(&mut self, draft: VariantDraft) -> Result<InsertOutcome, StoreError> {
        if draft.product_group_id != self.product_group_id {
            return Err(StoreError::Storage(format!(
                "draft for group {} written in a transaction for group {}",
                draft.product_group_id, self.product_group_id
            )));
        }

        let key = self.key(&draft.config_hash);
        let store = self.store;
        let deadline = Instant::now() + store.lock_timeout;
        let mut tables = store.tables.lock().map_err(poisoned)?;

        loop {
            if tables.active.contains_key(&key) {
                return Ok(InsertOutcome::Duplicate);
            }
            match tables.reserved.get(&key) {
                None => break,
                Some(&owner) if owner == self.serial => return Ok(InsertOutcome::Duplicate),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::Unavailable(format!(
                            "timed out after {:?} waiting for config {} held by another transaction",
                            store.lock_timeout, draft.config_hash
                        )));
                    }
                    let (guard, _) = store
                        .released
                        .wait_timeout(tables, deadline - now)
                        .map_err(poisoned)?;
                    tables = guard;
                }
            }
        }
        tables.reserved.insert(key, self.serial);
        drop(tables);

        let record = VariantRecord {
            id: VariantId::new(),
            draft,
            created_at: Utc::now(),
            archived_at: None,
        };
        self.pending.push(record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    fn commit(mut self: Box<Self>) -> Result<Vec<VariantRecord>, StoreError> {
        let store = self.store;
        let mut tables = store.tables.lock().map_err(poisoned)?;
        let pending = std::mem::take(&mut self.pending);

        for record in &pending {
            let key = self.key(&record.draft.config_hash);
            tables.reserved.remove(&key);
            tables.active.insert(key, record.id);
            tables.rows.insert(record.id, record.clone());
        }
        drop(tables);
        store.released.notify_all();

        self.committed = true;
        Ok(pending)
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.committed || self.pending.is_empty() {
            return;
        }
        let keys: Vec<UniqueKey> = self
            .pending
            .iter()
            .map(|r| self.key(&r.draft.config_hash))
            .collect();
        self.store.release(keys.into_iter());
    }
}

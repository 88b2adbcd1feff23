//! Persistence for ledger rows.
//!
//! Rows are versioned. A commit carries the rows as they were read and is
//! refused as a whole when any of them changed since; nothing is written in
//! that case. A commit also stores one receipt per movement it posts, so a
//! movement reaches the rows at most once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use thiserror::Error;

use bodega_core::TenantId;
use bodega_inventory::{InventoryKey, InventoryRecord};
use bodega_movements::MovementId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// Someone else committed the row after it was read.
    #[error("ledger row {key:?} changed: read at version {expected}, now at {actual}")]
    Conflict {
        key: InventoryKey,
        expected: u64,
        actual: u64,
    },

    /// A receipt for the movement is already stored.
    #[error("movement {0} is already posted")]
    AlreadyPosted(MovementId),

    #[error("invalid ledger write: {0}")]
    InvalidWrite(String),

    #[error("ledger store lock poisoned")]
    Poisoned,
}

/// What one movement did to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingReceipt {
    pub movement_id: MovementId,
    pub key: InventoryKey,
    pub applied_quantity: Decimal,
    pub value_change: Decimal,
    pub shortfall: Decimal,
}

pub trait LedgerStore: Send + Sync {
    /// Current row, or `None` when nothing was ever posted to the key.
    fn get(&self, tenant_id: TenantId, key: &InventoryKey)
    -> Result<Option<InventoryRecord>, LedgerStoreError>;

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, LedgerStoreError>;

    fn receipt(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
    ) -> Result<Option<PostingReceipt>, LedgerStoreError>;

    /// Write every row and receipt or none. Each row's `version` must be the
    /// version it was read at (0 for a new row); stored rows come back with
    /// the version bumped. A receipt for an already posted movement fails
    /// the commit with [`LedgerStoreError::AlreadyPosted`].
    fn commit(
        &self,
        tenant_id: TenantId,
        rows: Vec<InventoryRecord>,
        receipts: Vec<PostingReceipt>,
    ) -> Result<Vec<InventoryRecord>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn get(
        &self,
        tenant_id: TenantId,
        key: &InventoryKey,
    ) -> Result<Option<InventoryRecord>, LedgerStoreError> {
        (**self).get(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, LedgerStoreError> {
        (**self).list(tenant_id)
    }

    fn receipt(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
    ) -> Result<Option<PostingReceipt>, LedgerStoreError> {
        (**self).receipt(tenant_id, movement_id)
    }

    fn commit(
        &self,
        tenant_id: TenantId,
        rows: Vec<InventoryRecord>,
        receipts: Vec<PostingReceipt>,
    ) -> Result<Vec<InventoryRecord>, LedgerStoreError> {
        (**self).commit(tenant_id, rows, receipts)
    }
}

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<(TenantId, InventoryKey), InventoryRecord>,
    receipts: HashMap<(TenantId, MovementId), PostingReceipt>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn get(
        &self,
        tenant_id: TenantId,
        key: &InventoryKey,
    ) -> Result<Option<InventoryRecord>, LedgerStoreError> {
        let tables = self.tables.read().map_err(|_| LedgerStoreError::Poisoned)?;
        Ok(tables.rows.get(&(tenant_id, key.clone())).cloned())
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, LedgerStoreError> {
        let tables = self.tables.read().map_err(|_| LedgerStoreError::Poisoned)?;
        let mut out: Vec<InventoryRecord> = tables
            .rows
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn receipt(
        &self,
        tenant_id: TenantId,
        movement_id: MovementId,
    ) -> Result<Option<PostingReceipt>, LedgerStoreError> {
        let tables = self.tables.read().map_err(|_| LedgerStoreError::Poisoned)?;
        Ok(tables.receipts.get(&(tenant_id, movement_id)).cloned())
    }

    fn commit(
        &self,
        tenant_id: TenantId,
        rows: Vec<InventoryRecord>,
        receipts: Vec<PostingReceipt>,
    ) -> Result<Vec<InventoryRecord>, LedgerStoreError> {
        for (idx, row) in rows.iter().enumerate() {
            if rows[..idx].iter().any(|r| r.key == row.key) {
                return Err(LedgerStoreError::InvalidWrite(format!(
                    "row {:?} appears twice in one commit",
                    row.key
                )));
            }
            row.check_invariants()
                .map_err(|e| LedgerStoreError::InvalidWrite(e.to_string()))?;
        }
        for receipt in &receipts {
            if !rows.iter().any(|r| r.key == receipt.key) {
                return Err(LedgerStoreError::InvalidWrite(format!(
                    "receipt of movement {} names a row outside the commit",
                    receipt.movement_id
                )));
            }
        }

        let mut tables = self.tables.write().map_err(|_| LedgerStoreError::Poisoned)?;
        for row in &rows {
            let actual = tables
                .rows
                .get(&(tenant_id, row.key.clone()))
                .map(|r| r.version)
                .unwrap_or(0);
            if actual != row.version {
                return Err(LedgerStoreError::Conflict {
                    key: row.key.clone(),
                    expected: row.version,
                    actual,
                });
            }
        }
        if let Some(posted) = receipts
            .iter()
            .find(|r| tables.receipts.contains_key(&(tenant_id, r.movement_id)))
        {
            return Err(LedgerStoreError::AlreadyPosted(posted.movement_id));
        }

        let committed: Vec<InventoryRecord> = rows
            .into_iter()
            .map(|mut row| {
                row.version += 1;
                row
            })
            .collect();
        for row in &committed {
            tables.rows.insert((tenant_id, row.key.clone()), row.clone());
        }
        for receipt in receipts {
            tables.receipts.insert((tenant_id, receipt.movement_id), receipt);
        }
        Ok(committed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Wraps a store and fails the next `n` commits with a conflict.
    #[derive(Debug)]
    pub struct FlakyLedgerStore<S> {
        pub inner: S,
        pub remaining_conflicts: AtomicUsize,
    }

    impl<S> FlakyLedgerStore<S> {
        pub fn new(inner: S, conflicts: usize) -> Self {
            Self {
                inner,
                remaining_conflicts: AtomicUsize::new(conflicts),
            }
        }
    }

    impl<S: LedgerStore> LedgerStore for FlakyLedgerStore<S> {
        fn get(
            &self,
            tenant_id: TenantId,
            key: &InventoryKey,
        ) -> Result<Option<InventoryRecord>, LedgerStoreError> {
            self.inner.get(tenant_id, key)
        }

        fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, LedgerStoreError> {
            self.inner.list(tenant_id)
        }

        fn receipt(
            &self,
            tenant_id: TenantId,
            movement_id: MovementId,
        ) -> Result<Option<PostingReceipt>, LedgerStoreError> {
            self.inner.receipt(tenant_id, movement_id)
        }

        fn commit(
            &self,
            tenant_id: TenantId,
            rows: Vec<InventoryRecord>,
            receipts: Vec<PostingReceipt>,
        ) -> Result<Vec<InventoryRecord>, LedgerStoreError> {
            let left = self.remaining_conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_conflicts.store(left - 1, Ordering::SeqCst);
                let key = rows
                    .first()
                    .map(|r| r.key.clone())
                    .ok_or_else(|| LedgerStoreError::InvalidWrite("empty commit".into()))?;
                return Err(LedgerStoreError::Conflict {
                    key,
                    expected: 0,
                    actual: 1,
                });
            }
            self.inner.commit(tenant_id, rows, receipts)
        }
    }
}

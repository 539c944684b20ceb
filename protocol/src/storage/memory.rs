//! Process-local store.
//!
//! One mutex guards every collection, which makes the completion
//! uniqueness check and the insert a single critical section. Contention is
//! irrelevant at the scale this engine is used for.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{ConflictKind, RecordFilter, StoreError, StoreResult, TransactionStore};
use crate::transaction::types::{CompletedTransaction, PendingTransaction};

#[derive(Debug, Default)]
struct Collections {
    pending: HashMap<Uuid, PendingTransaction>,
    completed: HashMap<Uuid, CompletedTransaction>,
    by_link: HashMap<Uuid, Uuid>,
    by_hash: HashMap<String, Uuid>,
    address_cursor: u64,
}

/// In-memory [`TransactionStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.lock().completed.len()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn store_pending(&self, tx: &PendingTransaction) -> StoreResult<()> {
        self.inner
            .lock()
            .pending
            .insert(tx.transaction_id, tx.clone());
        Ok(())
    }

    async fn delete_pending(&self, id: &Uuid) -> StoreResult<bool> {
        Ok(self.inner.lock().pending.remove(id).is_some())
    }

    async fn get_pending(&self, id: &Uuid) -> StoreResult<Option<PendingTransaction>> {
        Ok(self.inner.lock().pending.get(id).cloned())
    }

    async fn list_pending(&self, filter: &RecordFilter) -> StoreResult<Vec<PendingTransaction>> {
        Ok(self
            .inner
            .lock()
            .pending
            .values()
            .filter(|tx| filter.matches_pending(tx))
            .cloned()
            .collect())
    }

    async fn store_completed(&self, tx: &CompletedTransaction) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.by_link.contains_key(&tx.linked_pending_transaction_id) {
            return Err(StoreError::Conflict(ConflictKind::DuplicateCompletion));
        }
        if inner.by_hash.contains_key(&tx.ledger_transaction_hash) {
            return Err(StoreError::Conflict(ConflictKind::HashAlreadyUsed));
        }
        inner
            .by_link
            .insert(tx.linked_pending_transaction_id, tx.transaction_id);
        inner
            .by_hash
            .insert(tx.ledger_transaction_hash.clone(), tx.transaction_id);
        inner.completed.insert(tx.transaction_id, tx.clone());
        Ok(())
    }

    async fn get_completed(&self, id: &Uuid) -> StoreResult<Option<CompletedTransaction>> {
        Ok(self.inner.lock().completed.get(id).cloned())
    }

    async fn get_completed_by_linked_id(
        &self,
        pending_id: &Uuid,
    ) -> StoreResult<Option<CompletedTransaction>> {
        let inner = self.inner.lock();
        Ok(inner
            .by_link
            .get(pending_id)
            .and_then(|id| inner.completed.get(id))
            .cloned())
    }

    async fn get_completed_by_hash(&self, hash: &str) -> StoreResult<Option<CompletedTransaction>> {
        let inner = self.inner.lock();
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|id| inner.completed.get(id))
            .cloned())
    }

    async fn list_completed(
        &self,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<CompletedTransaction>> {
        Ok(self
            .inner
            .lock()
            .completed
            .values()
            .filter(|tx| filter.matches_completed(tx))
            .cloned()
            .collect())
    }

    async fn next_address_index(&self) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let index = inner.address_cursor;
        inner.address_cursor += 1;
        Ok(index)
    }
}

//! # SledStore - Persistent Record Storage
//!
//! The durable [`TransactionStore`], built on sled's embedded key-value
//! store. Purchase records survive restarts, and so does the address
//! derivation cursor.
//!
//! ## Tree Layout
//!
//! | Tree                | Key                    | Value                        |
//! |---------------------|------------------------|------------------------------|
//! | `pending`           | `transaction_id` (16B) | `json(PendingTransaction)`   |
//! | `completed`         | `transaction_id` (16B) | `json(CompletedTransaction)` |
//! | `completed_by_link` | pending id (16B)       | completed id (16B)           |
//! | `completed_by_hash` | ledger hash (UTF-8)    | completed id (16B)           |
//! | `metadata`          | key (UTF-8)            | value (bytes)                |
//!
//! ## Atomicity
//!
//! A completion touches three trees: the record itself and both
//! uniqueness indexes. They are written in one sled transaction that
//! first checks the indexes, so two racing completions cannot both land.
//! The database is flushed before `store_completed` returns; a completion
//! that was reported stored is on disk.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use uuid::Uuid;

use super::{ConflictKind, RecordFilter, StoreError, StoreResult, TransactionStore};
use crate::transaction::types::{CompletedTransaction, PendingTransaction};

// ---------------------------------------------------------------------------
// Tree Names & Metadata Keys
// ---------------------------------------------------------------------------

const PENDING_TREE: &str = "pending";
const COMPLETED_TREE: &str = "completed";
const COMPLETED_BY_LINK_TREE: &str = "completed_by_link";
const COMPLETED_BY_HASH_TREE: &str = "completed_by_hash";
const METADATA_TREE: &str = "metadata";

/// Next unused address derivation index, 8 bytes big-endian.
const META_ADDRESS_CURSOR: &[u8] = b"address_cursor";

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// sled-backed [`TransactionStore`].
///
/// sled trees are safe for concurrent use, so a `SledStore` is shared
/// through `Arc` without extra locking.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    pending: Tree,
    completed: Tree,
    completed_by_link: Tree,
    completed_by_hash: Tree,
    metadata: Tree,
}

impl SledStore {
    /// Opens or creates a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Creates a throwaway database removed on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            pending: db.open_tree(PENDING_TREE)?,
            completed: db.open_tree(COMPLETED_TREE)?,
            completed_by_link: db.open_tree(COMPLETED_BY_LINK_TREE)?,
            completed_by_hash: db.open_tree(COMPLETED_BY_HASH_TREE)?,
            metadata: db.open_tree(METADATA_TREE)?,
            db,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Forces buffered writes to disk.
    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    // -- Helpers --------------------------------------------------------------

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn get_doc<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> StoreResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &Tree, keep: impl Fn(&T) -> bool) -> StoreResult<Vec<T>> {
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_key, value) = item?;
            let doc: T = Self::decode(&value)?;
            if keep(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn completed_via_index(&self, index: &Tree, key: &[u8]) -> StoreResult<Option<CompletedTransaction>> {
        match index.get(key)? {
            Some(id) => Self::get_doc(&self.completed, &id),
            None => Ok(None),
        }
    }
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

#[async_trait]
impl TransactionStore for SledStore {
    async fn store_pending(&self, tx: &PendingTransaction) -> StoreResult<()> {
        self.pending
            .insert(tx.transaction_id.as_bytes(), Self::encode(tx)?)?;
        Ok(())
    }

    async fn delete_pending(&self, id: &Uuid) -> StoreResult<bool> {
        Ok(self.pending.remove(id.as_bytes())?.is_some())
    }

    async fn get_pending(&self, id: &Uuid) -> StoreResult<Option<PendingTransaction>> {
        Self::get_doc(&self.pending, id.as_bytes())
    }

    async fn list_pending(&self, filter: &RecordFilter) -> StoreResult<Vec<PendingTransaction>> {
        Self::scan(&self.pending, |tx| filter.matches_pending(tx))
    }

    async fn store_completed(&self, tx: &CompletedTransaction) -> StoreResult<()> {
        let doc = Self::encode(tx)?;
        let id = tx.transaction_id.as_bytes().to_vec();
        let link = tx.linked_pending_transaction_id.as_bytes().to_vec();
        let hash = tx.ledger_transaction_hash.as_bytes().to_vec();

        let result = (&self.completed, &self.completed_by_link, &self.completed_by_hash).transaction(
            |(completed, by_link, by_hash)| {
                if by_link.get(&link)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        ConflictKind::DuplicateCompletion,
                    ));
                }
                if by_hash.get(&hash)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(ConflictKind::HashAlreadyUsed));
                }
                completed.insert(id.as_slice(), doc.as_slice())?;
                by_link.insert(link.as_slice(), id.as_slice())?;
                by_hash.insert(hash.as_slice(), id.as_slice())?;
                Ok(())
            },
        );

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(kind)) => return Err(StoreError::Conflict(kind)),
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }

        self.db.flush_async().await?;
        Ok(())
    }

    async fn get_completed(&self, id: &Uuid) -> StoreResult<Option<CompletedTransaction>> {
        Self::get_doc(&self.completed, id.as_bytes())
    }

    async fn get_completed_by_linked_id(
        &self,
        pending_id: &Uuid,
    ) -> StoreResult<Option<CompletedTransaction>> {
        self.completed_via_index(&self.completed_by_link, pending_id.as_bytes())
    }

    async fn get_completed_by_hash(&self, hash: &str) -> StoreResult<Option<CompletedTransaction>> {
        self.completed_via_index(&self.completed_by_hash, hash.as_bytes())
    }

    async fn list_completed(
        &self,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<CompletedTransaction>> {
        Self::scan(&self.completed, |tx| filter.matches_completed(tx))
    }

    async fn next_address_index(&self) -> StoreResult<u64> {
        let previous = self.metadata.fetch_and_update(META_ADDRESS_CURSOR, |old| {
            let next = old.and_then(decode_u64).unwrap_or(0).saturating_add(1);
            Some(next.to_be_bytes().to_vec())
        })?;
        // The index must be durable before the address is handed out.
        self.db.flush_async().await?;
        Ok(previous.and_then(|v| decode_u64(&v)).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::PlayerId;
    use std::sync::Arc;

    // -- Helpers ------------------------------------------------------------

    fn player(n: u128) -> PlayerId {
        PlayerId(Uuid::from_u128(n))
    }

    fn hash(c: char) -> String {
        c.to_string().repeat(81)
    }

    // -- Tests --------------------------------------------------------------

    #[tokio::test]
    async fn open_temporary_database() {
        let store = SledStore::open_temporary().expect("should create temp db");
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.completed_count(), 0);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pending = PendingTransaction::new(player(1), 3, 1337, hash('A'));
        let completed = CompletedTransaction::from_pending(&pending, hash('H'));
        {
            let store = SledStore::open(dir.path()).expect("should open db");
            store.store_pending(&pending).await.unwrap();
            store.store_completed(&completed).await.unwrap();
            assert_eq!(store.next_address_index().await.unwrap(), 0);
            store.flush().await.unwrap();
        }

        let store = SledStore::open(dir.path()).expect("should reopen db");
        assert_eq!(
            store.get_pending(&pending.transaction_id).await.unwrap(),
            Some(pending.clone())
        );
        assert_eq!(
            store
                .get_completed_by_linked_id(&pending.transaction_id)
                .await
                .unwrap(),
            Some(completed.clone())
        );
        assert_eq!(
            store.get_completed_by_hash(&hash('H')).await.unwrap(),
            Some(completed)
        );
        // The cursor continues where it stopped.
        assert_eq!(store.next_address_index().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pending_documents_are_plain_json() {
        let store = SledStore::open_temporary().unwrap();
        let pending = PendingTransaction::new(player(1), 0, 10, hash('A'));
        store.store_pending(&pending).await.unwrap();

        let raw = store
            .pending
            .get(pending.transaction_id.as_bytes())
            .unwrap()
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["iota"], 10);
        assert_eq!(doc["_id"], pending.transaction_id.to_string());
    }

    #[tokio::test]
    async fn delete_pending_reports_existence() {
        let store = SledStore::open_temporary().unwrap();
        let pending = PendingTransaction::new(player(1), 0, 10, hash('A'));
        store.store_pending(&pending).await.unwrap();

        assert!(store.delete_pending(&pending.transaction_id).await.unwrap());
        assert!(!store.delete_pending(&pending.transaction_id).await.unwrap());
        assert!(store.get_pending(&pending.transaction_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters() {
        let store = SledStore::open_temporary().unwrap();
        let a = PendingTransaction::new(player(1), 0, 10, hash('A'));
        let b = PendingTransaction::new(player(2), 1, 20, hash('B'));
        let c = PendingTransaction::new(player(1), 1, 20, hash('B'));
        for tx in [&a, &b, &c] {
            store.store_pending(tx).await.unwrap();
        }
        store
            .store_completed(&CompletedTransaction::from_pending(&c, hash('H')))
            .await
            .unwrap();

        let mine = store.list_pending(&RecordFilter::ByPlayer(player(1))).await.unwrap();
        assert_eq!(mine.len(), 2);
        let by_product = store.list_pending(&RecordFilter::ByProduct(1)).await.unwrap();
        assert_eq!(by_product.len(), 2);
        let by_address = store
            .list_pending(&RecordFilter::ByAddress(hash('A')))
            .await
            .unwrap();
        assert_eq!(by_address, vec![a]);

        let done = store.list_completed(&RecordFilter::ByPlayer(player(1))).await.unwrap();
        assert_eq!(done.len(), 1);
        assert!(store
            .list_completed(&RecordFilter::ByPlayer(player(2)))
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_completed(&RecordFilter::ByAddress(hash('B')))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn second_completion_for_same_pending_is_rejected() {
        let store = SledStore::open_temporary().unwrap();
        let pending = PendingTransaction::new(player(1), 0, 10, hash('A'));
        store
            .store_completed(&CompletedTransaction::from_pending(&pending, hash('H')))
            .await
            .unwrap();

        let err = store
            .store_completed(&CompletedTransaction::from_pending(&pending, hash('I')))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictKind::DuplicateCompletion)));
        // The rejected write left no index entry behind.
        assert!(store.get_completed_by_hash(&hash('I')).await.unwrap().is_none());
        assert_eq!(store.completed_count(), 1);
    }

    #[tokio::test]
    async fn reused_hash_is_rejected() {
        let store = SledStore::open_temporary().unwrap();
        let first = PendingTransaction::new(player(1), 0, 10, hash('A'));
        let second = PendingTransaction::new(player(2), 0, 10, hash('A'));
        store
            .store_completed(&CompletedTransaction::from_pending(&first, hash('H')))
            .await
            .unwrap();

        let err = store
            .store_completed(&CompletedTransaction::from_pending(&second, hash('H')))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictKind::HashAlreadyUsed)));
        assert!(store
            .get_completed_by_linked_id(&second.transaction_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_completions_of_one_pending_admit_exactly_one() {
        let store = Arc::new(SledStore::open_temporary().unwrap());
        let pending = PendingTransaction::new(player(1), 0, 10, hash('A'));

        let handles: Vec<_> = ['H', 'I', 'J', 'K', 'L', 'M', 'N', 'O']
            .into_iter()
            .map(|c| {
                let store = Arc::clone(&store);
                let completed = CompletedTransaction::from_pending(&pending, hash(c));
                tokio::spawn(async move { store.store_completed(&completed).await.is_ok() })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(store.completed_count(), 1);
    }

    #[tokio::test]
    async fn address_cursor_is_monotonic() {
        let store = SledStore::open_temporary().unwrap();
        let mut last = None;
        for expected in 0..5 {
            let index = store.next_address_index().await.unwrap();
            assert_eq!(index, expected);
            assert!(last.map_or(true, |l| index > l));
            last = Some(index);
        }
    }
}

//! # Storage Module
//!
//! Persistence for purchase records. The controller sees storage only
//! through [`TransactionStore`], so the engine behind it can be swapped
//! without touching the purchase logic.
//!
//! ## Architecture
//!
//! ```text
//! memory.rs - MemoryStore, process-local, for tests and dry runs
//! db.rs     - SledStore, embedded sled database with secondary indexes
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! TransactionController
//!         ↓
//!  TransactionStore ──→ pending        (by transaction id)
//!                   ──→ completed      (by transaction id)
//!                   ──→ by link / hash (uniqueness indexes)
//!                   ──→ address cursor
//! ```
//!
//! ## Design Decisions
//!
//! 1. **No joins.** Pending and completed records live in separate
//!    collections. Callers fetch both and compute the open set in memory.
//!
//! 2. **Uniqueness lives in the store.** A completion is rejected if its
//!    linked pending id or its ledger hash is already taken. The check and
//!    the insert are one atomic step in every engine, so even a caller that
//!    skipped the per-player lock cannot double-complete.
//!
//! 3. **JSON documents.** Records are stored with the same short field
//!    names as the external document format, which keeps the database
//!    readable with ordinary tools.

pub mod db;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{AddressCursor, LedgerError};
use crate::transaction::types::{CompletedTransaction, PendingTransaction, PlayerId};

pub use db::SledStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which uniqueness rule a rejected completion broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The pending transaction already has a completion.
    DuplicateCompletion,
    /// The ledger hash already paid for another purchase.
    HashAlreadyUsed,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateCompletion => write!(f, "pending transaction already completed"),
            Self::HashAlreadyUsed => write!(f, "ledger hash already used"),
        }
    }
}

/// Errors returned by storage engines.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Selects records in list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    ByPlayer(PlayerId),
    ByProduct(u32),
    /// Deposit address. Completed records carry no address, so this never
    /// matches one.
    ByAddress(String),
}

impl RecordFilter {
    pub fn matches_pending(&self, tx: &PendingTransaction) -> bool {
        match self {
            Self::ByPlayer(player) => tx.player_id == *player,
            Self::ByProduct(product) => tx.product_id == *product,
            Self::ByAddress(address) => tx.assigned_address == *address,
        }
    }

    pub fn matches_completed(&self, tx: &CompletedTransaction) -> bool {
        match self {
            Self::ByPlayer(player) => tx.player_id == *player,
            Self::ByProduct(product) => tx.product_id == *product,
            Self::ByAddress(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionStore
// ---------------------------------------------------------------------------

/// Persistence contract for purchase records.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    // -- Pending --------------------------------------------------------------

    /// Inserts or replaces a pending record.
    async fn store_pending(&self, tx: &PendingTransaction) -> StoreResult<()>;

    /// Deletes a pending record. Returns whether it existed.
    async fn delete_pending(&self, id: &Uuid) -> StoreResult<bool>;

    async fn get_pending(&self, id: &Uuid) -> StoreResult<Option<PendingTransaction>>;

    async fn list_pending(&self, filter: &RecordFilter) -> StoreResult<Vec<PendingTransaction>>;

    // -- Completed ------------------------------------------------------------

    /// Inserts a completion, enforcing that neither its linked pending id nor
    /// its ledger hash is already used.
    async fn store_completed(&self, tx: &CompletedTransaction) -> StoreResult<()>;

    async fn get_completed(&self, id: &Uuid) -> StoreResult<Option<CompletedTransaction>>;

    async fn get_completed_by_linked_id(
        &self,
        pending_id: &Uuid,
    ) -> StoreResult<Option<CompletedTransaction>>;

    async fn get_completed_by_hash(&self, hash: &str) -> StoreResult<Option<CompletedTransaction>>;

    async fn list_completed(&self, filter: &RecordFilter)
        -> StoreResult<Vec<CompletedTransaction>>;

    // -- Metadata -------------------------------------------------------------

    /// Atomically advances the address derivation cursor and returns the
    /// index to use. The first call returns 0.
    async fn next_address_index(&self) -> StoreResult<u64>;
}

/// Exposes a store's derivation cursor to the address allocator.
pub struct StoreCursor(pub Arc<dyn TransactionStore>);

#[async_trait]
impl AddressCursor for StoreCursor {
    async fn advance(&self) -> Result<u64, LedgerError> {
        self.0
            .next_address_index()
            .await
            .map_err(|e| LedgerError::Allocation(e.to_string()))
    }
}

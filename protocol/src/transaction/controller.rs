//! Purchase workflows: start, complete, cancel.
//!
//! Each workflow is a check-then-act sequence over the store ("is there an
//! open purchase?", then "create one"). Two requests for the same player
//! must not interleave inside that sequence, so every workflow runs under
//! the player's entry in [`PlayerLocks`]. Different players never contend.
//!
//! The store backs this up for completions: it refuses a second completion
//! of the same pending record and a second use of the same ledger hash.
//!
//! ```text
//!  NoPending ──start──→ Pending ──complete──→ Completed
//!                          │
//!                          └──cancel──→ Cancelled
//! ```
//!
//! Completed and Cancelled are final. A pending record is never deleted on
//! completion; it stops being open because a completion links to it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::grant::{render_commands, GrantOrder, GrantPublisher, PlayerDirectory};
use super::types::{open_pending, CompletedTransaction, PendingTransaction, PlayerId};
use super::verification::{Rejection, Verdict, VerificationEngine};
use crate::catalog::Catalog;
use crate::ledger::{LedgerError, LedgerGateway};
use crate::storage::{ConflictKind, RecordFilter, StoreError, TransactionStore};

// ---------------------------------------------------------------------------
// Outcomes & Errors
// ---------------------------------------------------------------------------

/// Result of [`TransactionController::start_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new purchase was opened. Carries the deposit address and id.
    Started(PendingTransaction),
    /// The player already has an open purchase, returned here.
    HasPending(PendingTransaction),
    /// No product with this id exists.
    UnknownProduct(u32),
}

/// Result of [`TransactionController::complete_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed(CompletedTransaction),
    /// The claimed payment was not accepted. The purchase stays open.
    Rejected(Rejection),
    /// The purchase was cancelled or never existed.
    HasNoPending,
    /// The purchase was already completed, possibly by a concurrent call.
    AlreadyCompleted,
}

/// Result of [`TransactionController::cancel_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The purchase was removed. Carries the removed record.
    Cancelled(PendingTransaction),
    HasNoPending,
}

/// Infrastructure failures. Business outcomes are never errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),

    #[error("ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// PlayerLocks
// ---------------------------------------------------------------------------

/// One async mutex per player, created on first use and dropped again once
/// nobody holds or waits for it.
#[derive(Debug, Default, Clone)]
pub struct PlayerLocks {
    inner: Arc<DashMap<PlayerId, Arc<Mutex<()>>>>,
}

impl PlayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `player`'s workflows.
    pub async fn acquire(&self, player: PlayerId) -> PlayerGuard {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self.inner.entry(player).or_default().clone();
        let guard = lock.lock_owned().await;
        PlayerGuard {
            player,
            locks: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one player's workflows. Dropping it releases the
/// lock and forgets the player if no one else is queued.
pub struct PlayerGuard {
    player: PlayerId,
    locks: Arc<DashMap<PlayerId, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PlayerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of one means the map
        // is the only owner left.
        self.locks
            .remove_if(&self.player, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// ---------------------------------------------------------------------------
// TransactionController
// ---------------------------------------------------------------------------

/// Orchestrates the purchase lifecycle.
pub struct TransactionController {
    store: Arc<dyn TransactionStore>,
    catalog: Arc<Catalog>,
    ledger: Arc<dyn LedgerGateway>,
    verifier: VerificationEngine,
    grants: GrantPublisher,
    directory: Arc<dyn PlayerDirectory>,
    locks: PlayerLocks,
}

impl TransactionController {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        catalog: Arc<Catalog>,
        ledger: Arc<dyn LedgerGateway>,
        verification_timeout: Duration,
        grants: GrantPublisher,
        directory: Arc<dyn PlayerDirectory>,
    ) -> Self {
        let verifier = VerificationEngine::new(ledger.clone(), verification_timeout);
        Self {
            store,
            catalog,
            ledger,
            verifier,
            grants,
            directory,
            locks: PlayerLocks::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -- Workflows ------------------------------------------------------------

    /// Opens a purchase of `product_id` for `player`, unless one is open.
    pub async fn start_transaction(
        &self,
        player: PlayerId,
        product_id: u32,
    ) -> Result<StartOutcome, ControllerError> {
        let product = match self.catalog.get(product_id) {
            Some(product) => product,
            None => return Ok(StartOutcome::UnknownProduct(product_id)),
        };

        let _guard = self.locks.acquire(player).await;

        if let Some(open) = self.find_open(player).await? {
            return Ok(StartOutcome::HasPending(open));
        }

        let address = self.ledger.allocate_deposit_address().await.map_err(|e| {
            tracing::error!(player = %player, error = %e, "deposit address allocation failed");
            e
        })?;

        let pending = PendingTransaction::new(player, product.id, product.price, address);
        self.store.store_pending(&pending).await.map_err(|e| {
            tracing::error!(player = %player, error = %e, "failed to persist pending transaction");
            e
        })?;

        tracing::info!(
            player = %player,
            transaction_id = %pending.transaction_id,
            product = product.id,
            amount = pending.amount,
            "purchase started"
        );
        Ok(StartOutcome::Started(pending))
    }

    /// Completes `pending` if `claimed_hash` pays for it.
    pub async fn complete_transaction(
        &self,
        pending: &PendingTransaction,
        claimed_hash: &str,
    ) -> Result<CompleteOutcome, ControllerError> {
        let _guard = self.locks.acquire(pending.player_id).await;
        self.complete_locked(pending, claimed_hash).await
    }

    /// Cancels `pending` if it is still open.
    pub async fn cancel_transaction(
        &self,
        pending: &PendingTransaction,
    ) -> Result<CancelOutcome, ControllerError> {
        let _guard = self.locks.acquire(pending.player_id).await;
        self.cancel_locked(pending).await
    }

    // -- Player-keyed conveniences --------------------------------------------

    /// The player's open purchase, if any. The oldest wins if legacy data
    /// holds more than one.
    pub async fn open_pending(
        &self,
        player: PlayerId,
    ) -> Result<Option<PendingTransaction>, ControllerError> {
        self.find_open(player).await
    }

    /// Completes whatever purchase `player` has open.
    pub async fn complete_for_player(
        &self,
        player: PlayerId,
        claimed_hash: &str,
    ) -> Result<CompleteOutcome, ControllerError> {
        let _guard = self.locks.acquire(player).await;
        match self.find_open(player).await? {
            Some(open) => self.complete_locked(&open, claimed_hash).await,
            None => Ok(CompleteOutcome::HasNoPending),
        }
    }

    /// Cancels whatever purchase `player` has open.
    pub async fn cancel_for_player(
        &self,
        player: PlayerId,
    ) -> Result<CancelOutcome, ControllerError> {
        let _guard = self.locks.acquire(player).await;
        match self.find_open(player).await? {
            Some(open) => self.cancel_locked(&open).await,
            None => Ok(CancelOutcome::HasNoPending),
        }
    }

    /// The player's completed purchases, oldest first.
    pub async fn history(
        &self,
        player: PlayerId,
    ) -> Result<Vec<CompletedTransaction>, ControllerError> {
        let mut completed = self
            .store
            .list_completed(&RecordFilter::ByPlayer(player))
            .await?;
        completed.sort_by_key(|c| c.completed_at);
        Ok(completed)
    }

    // -- Internals (caller holds the player lock) -----------------------------

    async fn find_open(
        &self,
        player: PlayerId,
    ) -> Result<Option<PendingTransaction>, ControllerError> {
        let filter = RecordFilter::ByPlayer(player);
        let pending = self.store.list_pending(&filter).await?;
        let completed = self.store.list_completed(&filter).await?;

        let open = open_pending(pending, &completed);
        if open.len() > 1 {
            tracing::warn!(player = %player, open = open.len(), "player has several open purchases");
        }
        Ok(open.into_iter().next())
    }

    async fn complete_locked(
        &self,
        pending: &PendingTransaction,
        claimed_hash: &str,
    ) -> Result<CompleteOutcome, ControllerError> {
        let id = pending.transaction_id;

        if self.store.get_completed_by_linked_id(&id).await?.is_some() {
            return Ok(CompleteOutcome::AlreadyCompleted);
        }
        // Work from the stored record. The caller's copy may be stale.
        let current = match self.store.get_pending(&id).await? {
            Some(current) if current.player_id == pending.player_id => current,
            Some(current) => {
                tracing::warn!(
                    player = %pending.player_id,
                    owner = %current.player_id,
                    transaction_id = %id,
                    "completion attempted for another player's purchase"
                );
                return Ok(CompleteOutcome::HasNoPending);
            }
            None => return Ok(CompleteOutcome::HasNoPending),
        };
        if self.store.get_completed_by_hash(claimed_hash).await?.is_some() {
            tracing::warn!(
                player = %current.player_id,
                transaction_id = %id,
                hash = %claimed_hash,
                "claimed hash already paid for another purchase"
            );
            return Ok(CompleteOutcome::Rejected(Rejection::HashAlreadyUsed));
        }

        if let Verdict::Rejected(reason) = self.verifier.verify(&current, claimed_hash).await {
            tracing::warn!(
                player = %current.player_id,
                transaction_id = %id,
                hash = %claimed_hash,
                reason = %reason,
                "payment rejected"
            );
            return Ok(CompleteOutcome::Rejected(reason));
        }

        let completed = CompletedTransaction::from_pending(&current, claimed_hash);
        match self.store.store_completed(&completed).await {
            Ok(()) => {}
            Err(StoreError::Conflict(ConflictKind::DuplicateCompletion)) => {
                return Ok(CompleteOutcome::AlreadyCompleted)
            }
            Err(StoreError::Conflict(ConflictKind::HashAlreadyUsed)) => {
                return Ok(CompleteOutcome::Rejected(Rejection::HashAlreadyUsed))
            }
            Err(e) => {
                tracing::error!(
                    player = %current.player_id,
                    transaction_id = %id,
                    hash = %claimed_hash,
                    error = %e,
                    "verified payment could not be recorded"
                );
                return Err(e.into());
            }
        }

        tracing::info!(
            player = %completed.player_id,
            transaction_id = %id,
            completion_id = %completed.transaction_id,
            hash = %claimed_hash,
            product = completed.product_id,
            "purchase completed"
        );

        self.dispatch_grant(&completed).await;
        Ok(CompleteOutcome::Completed(completed))
    }

    async fn cancel_locked(
        &self,
        pending: &PendingTransaction,
    ) -> Result<CancelOutcome, ControllerError> {
        let id = pending.transaction_id;

        if self.store.get_completed_by_linked_id(&id).await?.is_some() {
            return Ok(CancelOutcome::HasNoPending);
        }
        let current = match self.store.get_pending(&id).await? {
            Some(current) if current.player_id == pending.player_id => current,
            Some(current) => {
                tracing::warn!(
                    player = %pending.player_id,
                    owner = %current.player_id,
                    transaction_id = %id,
                    "cancellation attempted for another player's purchase"
                );
                return Ok(CancelOutcome::HasNoPending);
            }
            None => return Ok(CancelOutcome::HasNoPending),
        };
        if !self.store.delete_pending(&id).await? {
            return Ok(CancelOutcome::HasNoPending);
        }

        tracing::info!(player = %current.player_id, transaction_id = %id, "purchase cancelled");
        Ok(CancelOutcome::Cancelled(current))
    }

    /// Publishes the grant for a durably stored completion. Failures are
    /// logged only; the completion stands regardless.
    async fn dispatch_grant(&self, completed: &CompletedTransaction) {
        let product = match self.catalog.get(completed.product_id) {
            Some(product) => product,
            None => {
                tracing::error!(
                    completion_id = %completed.transaction_id,
                    product = completed.product_id,
                    "completed product missing from catalog, nothing granted"
                );
                return;
            }
        };

        let name = self.directory.display_name(&completed.player_id);
        let order = GrantOrder {
            completion_id: completed.transaction_id,
            player_id: completed.player_id,
            product_id: product.id,
            commands: render_commands(product, &completed.player_id, name.as_deref()),
        };
        if order.commands.is_empty() {
            tracing::debug!(completion_id = %completed.transaction_id, "product has no grant commands");
            return;
        }

        if let Err(e) = self.grants.publish(order).await {
            tracing::error!(
                completion_id = %completed.transaction_id,
                player = %completed.player_id,
                error = %e,
                "failed to queue grant"
            );
        }
    }
}

//! # Transaction Module
//!
//! The purchase lifecycle: from a buyer's intent, through ledger
//! verification, to a durable completion and the grant it triggers.
//!
//! ## Architecture
//!
//! ```text
//! types.rs        - PendingTransaction, CompletedTransaction, PlayerId, open-set derivation
//! verification.rs - VerificationEngine: claimed hash + intent → Accepted / Rejected
//! controller.rs   - TransactionController: start / complete / cancel under per-player locks
//! grant.rs        - GrantOrder queue, worker, and executor traits
//! ```
//!
//! ## Purchase Lifecycle
//!
//! 1. **Start** - [`TransactionController::start_transaction`] assigns a
//!    deposit address and stores a [`PendingTransaction`].
//! 2. **Pay** - The buyer transfers exactly the amount, attaching
//!    [`PendingTransaction::payment_message`].
//! 3. **Complete** - The buyer submits the hash. The [`VerificationEngine`]
//!    checks it, and on success a [`CompletedTransaction`] is stored.
//! 4. **Grant** - The product's commands are queued for execution.
//!
//! ## Design Decisions
//!
//! - There is no status field. "Open" means "no completion links here",
//!   recomputed from both collections on every query.
//! - Amounts are `u64` ledger units, fixed when the purchase starts.
//! - Ledger failures during verification read as an invalid hash. The buyer
//!   can retry; nothing is ever accepted by default.

pub mod controller;
pub mod grant;
pub mod types;
pub mod verification;

pub use controller::{
    CancelOutcome, CompleteOutcome, ControllerError, PlayerLocks, StartOutcome,
    TransactionController,
};
pub use grant::{
    grant_channel, spawn_grant_worker, ActionExecutor, ActionSession, GrantError, GrantOrder,
    GrantPublisher, NoDirectory, PlayerDirectory,
};
pub use types::{is_valid_hash, open_pending, CompletedTransaction, PendingTransaction, PlayerId};
pub use verification::{Rejection, Verdict, VerificationEngine};

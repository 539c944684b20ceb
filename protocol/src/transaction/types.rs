//! Record types for the purchase lifecycle.
//!
//! Two records exist: a [`PendingTransaction`] captures a buyer's intent,
//! a [`CompletedTransaction`] proves it was paid for. There is no status
//! field anywhere. Whether a pending record is still open is derived by
//! looking for a completion that links to it, see [`open_pending`].
//!
//! Both records serialize to JSON documents with short field names (`_id`,
//! `player`, `iota`, ...) so existing tooling can read the database.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::HASH_LENGTH;
use crate::ledger::trytes::is_trytes;

// ---------------------------------------------------------------------------
// PlayerId
// ---------------------------------------------------------------------------

/// Opaque buyer identity. Game accounts are identified by UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lowercase hyphenated, the form players paste into wallet messages.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for PlayerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// PendingTransaction
// ---------------------------------------------------------------------------

/// A purchase intent waiting for payment.
///
/// The amount is copied from the product when the intent is created, so a
/// later price change never affects a purchase already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    #[serde(rename = "_id")]
    pub transaction_id: Uuid,
    #[serde(rename = "player")]
    pub player_id: PlayerId,
    #[serde(rename = "product")]
    pub product_id: u32,
    #[serde(rename = "iota")]
    pub amount: u64,
    #[serde(rename = "address")]
    pub assigned_address: String,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Creates a fresh intent with a random id, stamped now.
    pub fn new(
        player_id: PlayerId,
        product_id: u32,
        amount: u64,
        assigned_address: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            player_id,
            product_id,
            amount,
            assigned_address: assigned_address.into(),
            created_at: now_millis(),
        }
    }

    /// The message the buyer must attach to the transfer:
    /// `"<player id> <transaction id>"`.
    pub fn payment_message(&self) -> String {
        format!("{} {}", self.player_id, self.transaction_id.hyphenated())
    }
}

// ---------------------------------------------------------------------------
// CompletedTransaction
// ---------------------------------------------------------------------------

/// Immutable proof that a pending purchase was paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTransaction {
    #[serde(rename = "_id")]
    pub transaction_id: Uuid,
    #[serde(rename = "linked_transaction")]
    pub linked_pending_transaction_id: Uuid,
    #[serde(rename = "player")]
    pub player_id: PlayerId,
    #[serde(rename = "product")]
    pub product_id: u32,
    #[serde(rename = "iota")]
    pub amount: u64,
    #[serde(rename = "hash")]
    pub ledger_transaction_hash: String,
    #[serde(rename = "timestamp_started", with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "timestamp_completed", with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

impl CompletedTransaction {
    /// Builds the completion record for `pending`, paid by `hash`.
    pub fn from_pending(pending: &PendingTransaction, hash: impl Into<String>) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            linked_pending_transaction_id: pending.transaction_id,
            player_id: pending.player_id,
            product_id: pending.product_id,
            amount: pending.amount,
            ledger_transaction_hash: hash.into(),
            started_at: pending.created_at,
            completed_at: now_millis(),
        }
    }
}

/// Current time at the precision documents are stored with.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

// ---------------------------------------------------------------------------
// Derived State
// ---------------------------------------------------------------------------

/// Pending records that no completion links to, oldest first.
pub fn open_pending(
    pending: Vec<PendingTransaction>,
    completed: &[CompletedTransaction],
) -> Vec<PendingTransaction> {
    let linked: HashSet<Uuid> = completed
        .iter()
        .map(|c| c.linked_pending_transaction_id)
        .collect();

    let mut open: Vec<PendingTransaction> = pending
        .into_iter()
        .filter(|p| !linked.contains(&p.transaction_id))
        .collect();
    open.sort_by_key(|p| p.created_at);
    open
}

/// Returns `true` for a well-formed ledger transaction hash.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LENGTH && is_trytes(hash)
}

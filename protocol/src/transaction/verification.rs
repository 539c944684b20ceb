//! Payment verification: does a claimed ledger hash pay for a purchase?
//!
//! The ledger is untrusted input. A claimed hash is accepted only when the
//! transaction it names pays exactly the purchase amount into the assigned
//! deposit address and carries the purchase's payment message. Every check runs on every candidate entry; a
//! partial match is never enough.
//!
//! Verification reads the ledger and nothing else. It never mutates state,
//! so it can run concurrently and be repeated freely.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::types::{is_valid_hash, PendingTransaction};
use crate::ledger::address::strip_checksum;
use crate::ledger::{Bundle, LedgerGateway};

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Why a claimed payment was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// The hash is malformed, unknown to the ledger, or the ledger could
    /// not be consulted in time.
    InvalidHash,
    /// The bundle exists but holds no transfer matching the purchase.
    NoMatchingTransfer,
    /// The hash already paid for another purchase.
    HashAlreadyUsed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHash => write!(f, "invalid hash"),
            Self::NoMatchingTransfer => write!(f, "no completed transaction found"),
            Self::HashAlreadyUsed => write!(f, "hash already used for another purchase"),
        }
    }
}

/// Outcome of [`VerificationEngine::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Returns `true` if `bundle` contains an entry with hash `claimed_hash`
/// whose message is `pending`'s payment message, whose value is exactly
/// `pending.amount` and whose address is the assigned deposit address.
/// Address checksums are ignored on both sides.
pub fn bundle_pays_for(bundle: &Bundle, pending: &PendingTransaction, claimed_hash: &str) -> bool {
    let expected_address = strip_checksum(&pending.assigned_address);
    let expected_message = pending.payment_message();
    let expected_value = match i64::try_from(pending.amount) {
        Ok(v) => v,
        Err(_) => return false,
    };

    bundle.entries_with_hash(claimed_hash).any(|entry| {
        let message_ok = match entry.message() {
            Ok(message) => message == expected_message,
            Err(e) => {
                tracing::debug!(hash = %claimed_hash, error = %e, "undecodable payment message");
                false
            }
        };
        let value_ok = entry.value == expected_value;
        let address_ok = strip_checksum(&entry.address) == expected_address;
        message_ok && value_ok && address_ok
    })
}

// ---------------------------------------------------------------------------
// VerificationEngine
// ---------------------------------------------------------------------------

/// Checks claimed payments against the ledger under a bounded wait.
#[derive(Clone)]
pub struct VerificationEngine {
    ledger: Arc<dyn LedgerGateway>,
    timeout: Duration,
}

impl VerificationEngine {
    pub fn new(ledger: Arc<dyn LedgerGateway>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Verifies that `claimed_hash` pays for `pending`.
    ///
    /// Ledger failures of any kind, including the timeout expiring, yield
    /// [`Rejection::InvalidHash`]. The cause is logged, not returned.
    pub async fn verify(&self, pending: &PendingTransaction, claimed_hash: &str) -> Verdict {
        if !is_valid_hash(claimed_hash) {
            tracing::debug!(
                transaction_id = %pending.transaction_id,
                "rejecting malformed hash without ledger lookup"
            );
            return Verdict::Rejected(Rejection::InvalidHash);
        }

        let started = Instant::now();
        let fetched = tokio::time::timeout(self.timeout, self.ledger.fetch_bundle(claimed_hash)).await;

        let bundle = match fetched {
            Ok(Ok(bundle)) => bundle,
            Ok(Err(e)) => {
                tracing::warn!(
                    transaction_id = %pending.transaction_id,
                    hash = %claimed_hash,
                    error = %e,
                    "ledger lookup failed"
                );
                return Verdict::Rejected(Rejection::InvalidHash);
            }
            Err(_) => {
                tracing::warn!(
                    transaction_id = %pending.transaction_id,
                    hash = %claimed_hash,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "ledger lookup timed out"
                );
                return Verdict::Rejected(Rejection::InvalidHash);
            }
        };

        let accepted = bundle_pays_for(&bundle, pending, claimed_hash);
        tracing::debug!(
            transaction_id = %pending.transaction_id,
            hash = %claimed_hash,
            entries = bundle.entries.len(),
            accepted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "verified claimed payment"
        );

        if accepted {
            Verdict::Accepted
        } else {
            Verdict::Rejected(Rejection::NoMatchingTransfer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::address::add_checksum;
    use crate::ledger::mock::{MockFailure, MockLedger};
    use crate::ledger::LedgerEntry;
    use crate::transaction::types::PlayerId;
    use uuid::Uuid;

    fn address() -> String {
        "D".repeat(81)
    }

    fn setup() -> (Arc<MockLedger>, VerificationEngine, PendingTransaction) {
        let ledger = Arc::new(MockLedger::new(address()));
        let engine = VerificationEngine::new(ledger.clone(), Duration::from_secs(5));
        let pending = PendingTransaction::new(PlayerId(Uuid::new_v4()), 7, 1000, address());
        (ledger, engine, pending)
    }

    #[tokio::test]
    async fn exact_payment_is_accepted() {
        let (ledger, engine, pending) = setup();
        let hash = ledger
            .record_payment(&address(), 1000, &pending.payment_message())
            .unwrap();
        assert_eq!(engine.verify(&pending, &hash).await, Verdict::Accepted);
    }

    #[tokio::test]
    async fn verification_is_repeatable() {
        let (ledger, engine, pending) = setup();
        let hash = ledger
            .record_payment(&address(), 1000, &pending.payment_message())
            .unwrap();
        let first = engine.verify(&pending, &hash).await;
        let second = engine.verify(&pending, &hash).await;
        assert_eq!(first, second);
        assert!(first.is_accepted());
    }

    #[tokio::test]
    async fn wrong_amount_is_no_matching_transfer() {
        let (ledger, engine, pending) = setup();
        let under = ledger
            .record_payment(&address(), 999, &pending.payment_message())
            .unwrap();
        let over = ledger
            .record_payment(&address(), 1001, &pending.payment_message())
            .unwrap();
        for hash in [under, over] {
            assert_eq!(
                engine.verify(&pending, &hash).await,
                Verdict::Rejected(Rejection::NoMatchingTransfer)
            );
        }
    }

    #[tokio::test]
    async fn wrong_message_is_no_matching_transfer() {
        let (ledger, engine, pending) = setup();
        let other = PendingTransaction::new(pending.player_id, 7, 1000, address());
        let hash = ledger
            .record_payment(&address(), 1000, &other.payment_message())
            .unwrap();
        assert_eq!(
            engine.verify(&pending, &hash).await,
            Verdict::Rejected(Rejection::NoMatchingTransfer)
        );
    }

    #[tokio::test]
    async fn payment_to_another_address_is_no_matching_transfer() {
        let (ledger, engine, pending) = setup();
        let hash = ledger
            .record_payment(&"E".repeat(81), 1000, &pending.payment_message())
            .unwrap();
        assert_eq!(
            engine.verify(&pending, &hash).await,
            Verdict::Rejected(Rejection::NoMatchingTransfer)
        );
    }

    #[tokio::test]
    async fn checksummed_assigned_address_matches_bare_entry() {
        let (ledger, engine, _) = setup();
        let pending = PendingTransaction::new(
            PlayerId(Uuid::new_v4()),
            7,
            1000,
            add_checksum(&address()),
        );
        let hash = ledger
            .record_payment(&address(), 1000, &pending.payment_message())
            .unwrap();
        assert_eq!(engine.verify(&pending, &hash).await, Verdict::Accepted);
    }

    #[tokio::test]
    async fn matching_sibling_entry_does_not_count() {
        // The payment sits in the bundle, but under a different hash than
        // the one claimed.
        let (ledger, engine, pending) = setup();
        let paid = ledger
            .record_payment(&address(), 1000, &pending.payment_message())
            .unwrap();
        let bundle = ledger.fetch_bundle(&paid).await.unwrap();
        let sibling: &LedgerEntry = &bundle.entries[1];
        assert_eq!(
            engine.verify(&pending, &sibling.hash).await,
            Verdict::Rejected(Rejection::NoMatchingTransfer)
        );
    }

    #[tokio::test]
    async fn malformed_hash_skips_the_ledger() {
        let (ledger, engine, pending) = setup();
        let short = "A".repeat(80);
        for hash in ["", "abc", short.as_str()] {
            assert_eq!(
                engine.verify(&pending, hash).await,
                Verdict::Rejected(Rejection::InvalidHash)
            );
        }
        assert_eq!(ledger.fetch_count(), 0);
    }

    #[tokio::test]
    async fn unknown_hash_and_ledger_errors_are_invalid_hash() {
        let (ledger, engine, pending) = setup();
        assert_eq!(
            engine.verify(&pending, &"Q".repeat(81)).await,
            Verdict::Rejected(Rejection::InvalidHash)
        );

        let hash = ledger
            .record_payment(&address(), 1000, &pending.payment_message())
            .unwrap();
        ledger.set_failure(Some(MockFailure::Transport));
        assert_eq!(
            engine.verify(&pending, &hash).await,
            Verdict::Rejected(Rejection::InvalidHash)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ledger_times_out_as_invalid_hash() {
        let (ledger, engine, pending) = setup();
        let hash = ledger
            .record_payment(&address(), 1000, &pending.payment_message())
            .unwrap();
        ledger.set_latency(Duration::from_secs(60));
        assert_eq!(
            engine.verify(&pending, &hash).await,
            Verdict::Rejected(Rejection::InvalidHash)
        );
    }

    #[test]
    fn rejection_messages() {
        assert_eq!(Rejection::InvalidHash.to_string(), "invalid hash");
        assert_eq!(
            Rejection::NoMatchingTransfer.to_string(),
            "no completed transaction found"
        );
    }
}

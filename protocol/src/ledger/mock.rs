//! In-memory ledger for tests and local development.
//!
//! Bundles are registered up front (or while running, from a dev console)
//! and served by hash. Latency and failures can be injected to exercise the
//! verification timeout and error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::address::AddressAllocator;
use super::trytes::{ascii_to_trytes, pad_trytes, TryteError, TRYTE_ALPHABET};
use super::{Bundle, LedgerEntry, LedgerError, LedgerGateway};
use crate::config::{HASH_LENGTH, MESSAGE_TRYTES_LENGTH};

/// Failure the mock returns instead of serving bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transport,
    Timeout,
}

/// Mock implementation of [`LedgerGateway`].
pub struct MockLedger {
    allocator: AddressAllocator,
    bundles: RwLock<HashMap<String, Bundle>>,
    latency: RwLock<Duration>,
    failure: RwLock<Option<MockFailure>>,
    fetches: AtomicU64,
    hash_counter: AtomicU64,
}

impl MockLedger {
    /// Creates a mock handing out `address` for every purchase.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_allocator(AddressAllocator::Fixed(address.into()))
    }

    /// Creates a mock with a custom address allocator.
    pub fn with_allocator(allocator: AddressAllocator) -> Self {
        Self {
            allocator,
            bundles: RwLock::new(HashMap::new()),
            latency: RwLock::new(Duration::ZERO),
            failure: RwLock::new(None),
            fetches: AtomicU64::new(0),
            hash_counter: AtomicU64::new(0),
        }
    }

    /// Delays every `fetch_bundle` call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Makes every `fetch_bundle` call fail. `None` restores normal service.
    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.write() = failure;
    }

    /// Number of `fetch_bundle` calls served so far, failures included.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Registers a bundle under the hash of each of its entries.
    pub fn insert_bundle(&self, bundle: Bundle) {
        let mut bundles = self.bundles.write();
        for entry in &bundle.entries {
            bundles.insert(entry.hash.clone(), bundle.clone());
        }
    }

    /// Records a payment of `value` to `address` carrying `message`, as a
    /// two-entry bundle (the payment plus its funding input). Returns the
    /// hash of the payment entry.
    pub fn record_payment(
        &self,
        address: &str,
        value: i64,
        message: &str,
    ) -> Result<String, TryteError> {
        let bundle_hash = self.fresh_hash();
        let tail = LedgerEntry {
            hash: self.fresh_hash(),
            address: address.to_string(),
            value,
            message_fragment: pad_trytes(&ascii_to_trytes(message)?, MESSAGE_TRYTES_LENGTH + 1),
            current_index: 0,
            last_index: 1,
            bundle: bundle_hash.clone(),
        };
        let input = LedgerEntry {
            hash: self.fresh_hash(),
            address: self.fresh_hash(),
            value: -value,
            message_fragment: "9".repeat(MESSAGE_TRYTES_LENGTH + 1),
            current_index: 1,
            last_index: 1,
            bundle: bundle_hash,
        };
        let hash = tail.hash.clone();
        self.insert_bundle(Bundle {
            entries: vec![tail, input],
        });
        Ok(hash)
    }

    /// Produces a unique, well-formed transaction hash.
    pub fn fresh_hash(&self) -> String {
        let n = self.hash_counter.fetch_add(1, Ordering::Relaxed);
        let mut raw = [0u8; HASH_LENGTH];
        blake3::Hasher::new()
            .update(b"tanglecart mock ledger")
            .update(&n.to_le_bytes())
            .finalize_xof()
            .fill(&mut raw);
        raw.iter()
            .map(|b| TRYTE_ALPHABET[(*b % 27) as usize] as char)
            .collect()
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn allocate_deposit_address(&self) -> Result<String, LedgerError> {
        self.allocator.allocate().await
    }

    async fn fetch_bundle(&self, hash: &str) -> Result<Bundle, LedgerError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        // Copy out before matching so the guard is not held across returns.
        let failure = *self.failure.read();
        match failure {
            Some(MockFailure::Transport) => {
                return Err(LedgerError::Transport("mock transport failure".to_string()))
            }
            Some(MockFailure::Timeout) => {
                return Err(LedgerError::Timeout {
                    elapsed_ms: latency.as_millis() as u64,
                })
            }
            None => {}
        }

        self.bundles
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                hash: hash.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::trytes::is_trytes;

    fn address() -> String {
        "D".repeat(81)
    }

    #[tokio::test]
    async fn recorded_payment_is_served_under_every_member_hash() {
        let ledger = MockLedger::new(address());
        let hash = ledger.record_payment(&address(), 1000, "a b").unwrap();
        assert_eq!(hash.len(), HASH_LENGTH);
        assert!(is_trytes(&hash));

        let bundle = ledger.fetch_bundle(&hash).await.unwrap();
        assert_eq!(bundle.entries.len(), 2);
        let tail = bundle.entries_with_hash(&hash).next().unwrap();
        assert_eq!(tail.value, 1000);
        assert_eq!(tail.message().unwrap(), "a b");

        let other = &bundle.entries[1].hash;
        assert_eq!(ledger.fetch_bundle(other).await.unwrap(), bundle);
        assert_eq!(ledger.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unknown_hash_and_injected_failures() {
        let ledger = MockLedger::new(address());
        assert!(matches!(
            ledger.fetch_bundle(&"A".repeat(81)).await,
            Err(LedgerError::NotFound { .. })
        ));

        let hash = ledger.record_payment(&address(), 1, "m").unwrap();
        ledger.set_failure(Some(MockFailure::Transport));
        assert!(matches!(
            ledger.fetch_bundle(&hash).await,
            Err(LedgerError::Transport(_))
        ));
        ledger.set_failure(None);
        assert!(ledger.fetch_bundle(&hash).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_applied() {
        let ledger = MockLedger::new(address());
        let hash = ledger.record_payment(&address(), 1, "m").unwrap();
        ledger.set_latency(Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        ledger.fetch_bundle(&hash).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn fresh_hashes_differ() {
        let ledger = MockLedger::new(address());
        assert_ne!(ledger.fresh_hash(), ledger.fresh_hash());
    }
}

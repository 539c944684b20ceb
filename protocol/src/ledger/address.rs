//! Deposit address allocation.
//!
//! Two modes, chosen by the operator:
//!
//! - **Fixed**: every purchase pays into the same address. The payment
//!   message is what tells purchases apart.
//! - **Seeded**: address `n` is derived from the seed, with `n` taken from a
//!   persisted cursor that only moves forward. A derived address is handed
//!   out at most once, so it can never collide with an open purchase.
//!
//! Seeded addresses follow the ledger's own scheme (security level 2), so
//! any wallet holding the seed controls the funds paid into them:
//!
//! ```text
//! subseed = Kerl(seed + n)
//! key     = Kerl squeezed from subseed, 27 hashes per security level
//! digest  = Kerl(each 243-trit key chunk hashed 26 times), per level
//! address = Kerl(digests) || last 9 trytes of Kerl(address)
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::kerl::{Kerl, HASH_TRITS};
use super::trytes::{trits_to_trytes, trytes_to_trits, Trit, TryteError};
use super::LedgerError;
use crate::config::{ADDRESS_LENGTH, ADDRESS_WITH_CHECKSUM_LENGTH, SECURITY_LEVEL};

/// Hashes making up one key fragment.
const FRAGMENT_CHUNKS: usize = 27;

/// Hash rounds turning a key chunk into its public counterpart.
const CHUNK_ROUNDS: usize = 26;

/// Source of monotonically increasing derivation indices.
///
/// Implemented by the transaction stores so that the cursor survives
/// restarts together with the purchases it was used for.
#[async_trait]
pub trait AddressCursor: Send + Sync {
    /// Atomically advances the cursor, returning the index to use.
    async fn advance(&self) -> Result<u64, LedgerError>;
}

/// Chooses deposit addresses according to the configured mode.
#[derive(Clone)]
pub enum AddressAllocator {
    Fixed(String),
    Seeded {
        seed: String,
        cursor: Arc<dyn AddressCursor>,
    },
}

impl std::fmt::Debug for AddressAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(address) => f.debug_tuple("Fixed").field(address).finish(),
            // Never print the seed.
            Self::Seeded { .. } => f.debug_struct("Seeded").finish_non_exhaustive(),
        }
    }
}

impl AddressAllocator {
    /// Returns the next deposit address.
    pub async fn allocate(&self) -> Result<String, LedgerError> {
        match self {
            Self::Fixed(address) => Ok(address.clone()),
            Self::Seeded { seed, cursor } => {
                let index = cursor.advance().await?;
                tracing::debug!(index, "deriving deposit address");

                // Several thousand hashes; keep them off the async workers.
                let seed = seed.clone();
                tokio::task::spawn_blocking(move || derive_address(&seed, index))
                    .await
                    .map_err(|e| LedgerError::Allocation(e.to_string()))?
                    .map_err(|e| LedgerError::Allocation(e.to_string()))
            }
        }
    }
}

/// Derives deposit address number `index` from `seed`, checksum included.
pub fn derive_address(seed: &str, index: u64) -> Result<String, TryteError> {
    let mut seed_trits = trytes_to_trits(seed)?;
    seed_trits.resize(HASH_TRITS, 0);

    let subseed = Kerl::hash(&add_index(seed_trits, index));

    let mut key = vec![0; SECURITY_LEVEL * FRAGMENT_CHUNKS * HASH_TRITS];
    let mut sponge = Kerl::new();
    sponge.absorb(&subseed);
    sponge.squeeze(&mut key);

    let mut digests = Vec::with_capacity(SECURITY_LEVEL * HASH_TRITS);
    for fragment in key.chunks_mut(FRAGMENT_CHUNKS * HASH_TRITS) {
        for chunk in fragment.chunks_mut(HASH_TRITS) {
            for _ in 0..CHUNK_ROUNDS {
                let next = Kerl::hash(chunk);
                chunk.copy_from_slice(&next);
            }
        }
        digests.extend_from_slice(&Kerl::hash(fragment));
    }

    let address = trits_to_trytes(&Kerl::hash(&digests));
    Ok(add_checksum(&address))
}

/// Appends the 9-tryte checksum to an 81-tryte address.
pub fn add_checksum(address: &str) -> String {
    let mut out = address.to_string();
    out.push_str(&checksum(address));
    out
}

/// Returns `true` if `address` is 90 trytes whose last 9 are the checksum
/// of the first 81.
pub fn has_valid_checksum(address: &str) -> bool {
    address.len() == ADDRESS_WITH_CHECKSUM_LENGTH
        && address.is_char_boundary(ADDRESS_LENGTH)
        && checksum(&address[..ADDRESS_LENGTH]) == address[ADDRESS_LENGTH..]
}

/// The 81-tryte address, with any checksum stripped.
pub fn strip_checksum(address: &str) -> &str {
    address.get(..ADDRESS_LENGTH).unwrap_or(address)
}

fn checksum(address: &str) -> String {
    let mut trits = match trytes_to_trits(address) {
        Ok(trits) => trits,
        Err(_) => return String::new(),
    };
    trits.resize(HASH_TRITS, 0);
    let hash = trits_to_trytes(&Kerl::hash(&trits));
    hash[ADDRESS_LENGTH - (ADDRESS_WITH_CHECKSUM_LENGTH - ADDRESS_LENGTH)..].to_string()
}

/// Adds `index` to the seed as a balanced ternary number, dropping any
/// carry out of the top trit.
fn add_index(mut trits: Vec<Trit>, index: u64) -> Vec<Trit> {
    let mut rest = index;
    let mut carry: Trit = 0;
    for trit in trits.iter_mut() {
        if rest == 0 && carry == 0 {
            break;
        }
        let mut sum = *trit + (rest % 3) as Trit + carry;
        rest /= 3;
        carry = 0;
        if sum > 1 {
            sum -= 3;
            carry = 1;
        } else if sum < -1 {
            sum += 3;
            carry = -1;
        }
        *trit = sum;
    }
    trits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::trytes::is_trytes;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingCursor(AtomicU64);

    #[async_trait]
    impl AddressCursor for CountingCursor {
        async fn advance(&self) -> Result<u64, LedgerError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn seed() -> String {
        "SEED9".repeat(17)[..81].to_string()
    }

    #[test]
    fn index_addition_carries() {
        let zero = vec![0; 6];
        assert_eq!(add_index(zero.clone(), 0), zero);
        assert_eq!(add_index(zero.clone(), 1), vec![1, 0, 0, 0, 0, 0]);
        assert_eq!(add_index(zero.clone(), 2), vec![-1, 1, 0, 0, 0, 0]);
        assert_eq!(add_index(zero.clone(), 13), vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(add_index(zero, 14), vec![-1, -1, -1, 1, 0, 0]);

        // Repeated increments and one addition agree.
        let start = trytes_to_trits("MN9").unwrap();
        let mut stepped = start.clone();
        for _ in 0..40 {
            stepped = add_index(stepped, 1);
        }
        assert_eq!(add_index(start, 40), stepped);
    }

    #[test]
    fn derived_address_is_well_formed() {
        let a = derive_address(&seed(), 0).unwrap();
        assert_eq!(a.len(), ADDRESS_WITH_CHECKSUM_LENGTH);
        assert!(is_trytes(&a));
        assert!(has_valid_checksum(&a));
        assert_eq!(a, derive_address(&seed(), 0).unwrap());
    }

    #[test]
    fn derivation_depends_on_index_and_seed() {
        assert_ne!(
            derive_address(&seed(), 0).unwrap(),
            derive_address(&seed(), 1).unwrap()
        );
        assert_ne!(
            derive_address(&seed(), 0).unwrap(),
            derive_address(&"B".repeat(81), 0).unwrap()
        );
        assert!(derive_address("not trytes", 0).is_err());
    }

    #[test]
    fn checksum_helpers() {
        let bare = "9".repeat(ADDRESS_LENGTH);
        let full = add_checksum(&bare);
        assert!(has_valid_checksum(&full));
        assert_eq!(strip_checksum(&full), bare);
        assert_eq!(strip_checksum(&bare), bare);

        assert!(!has_valid_checksum(&bare));
        let mut tampered = full.clone();
        tampered.replace_range(0..1, "A");
        assert!(!has_valid_checksum(&tampered));
    }

    #[tokio::test]
    async fn fixed_mode_repeats_address() {
        let allocator = AddressAllocator::Fixed("ADDR".to_string());
        assert_eq!(allocator.allocate().await.unwrap(), "ADDR");
        assert_eq!(allocator.allocate().await.unwrap(), "ADDR");
    }

    #[tokio::test]
    async fn seeded_mode_never_repeats() {
        let allocator = AddressAllocator::Seeded {
            seed: seed(),
            cursor: Arc::new(CountingCursor(AtomicU64::new(0))),
        };
        let mut seen = std::collections::HashSet::new();
        for index in 0..4 {
            let address = allocator.allocate().await.unwrap();
            assert_eq!(address, derive_address(&seed(), index).unwrap());
            assert!(seen.insert(address));
        }
    }

    #[test]
    fn debug_output_hides_seed() {
        let allocator = AddressAllocator::Seeded {
            seed: seed(),
            cursor: Arc::new(CountingCursor(AtomicU64::new(0))),
        };
        assert!(!format!("{:?}", allocator).contains("SEED9"));
    }
}

//! # Ledger Module
//!
//! Everything tanglecart knows about the distributed ledger, which is very
//! little on purpose. The core only needs two things from the outside
//! world: a deposit address to hand to a buyer, and the bundle behind a
//! hash the buyer claims to have sent.
//!
//! ## Architecture
//!
//! ```text
//! trytes.rs  - Base-27 codec for hashes, values and attached messages
//! kerl.rs    - The ledger's Keccak-based ternary hash
//! address.rs - Deposit address allocation (fixed or seed-derived)
//! http.rs    - Ledger node client speaking the legacy JSON API
//! mock.rs    - In-memory ledger for tests and local development
//! ```
//!
//! ## Design Decisions
//!
//! - [`LedgerGateway`] is a pure adapter. It holds no purchase state and
//!   never decides whether a payment counts; that is the verification
//!   engine's job.
//! - Bundle contents are untrusted input. The gateway reports what the
//!   node returned, including unrelated bundle members, and leaves the
//!   filtering to the caller.

pub mod address;
pub mod http;
pub mod kerl;
pub mod mock;
pub mod trytes;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use address::{AddressAllocator, AddressCursor};
pub use http::HttpLedgerGateway;
pub use mock::MockLedger;
pub use trytes::TryteError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by ledger adapters.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The node could not be reached or answered with an error.
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// The node does not know the requested hash.
    #[error("ledger has no transaction {hash}")]
    NotFound { hash: String },

    /// A tryte field returned by the node could not be decoded.
    #[error("malformed ledger data: {0}")]
    InvalidTrytes(#[from] TryteError),

    /// The transactions do not form a well-formed bundle.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// The node did not answer within the allotted time.
    #[error("ledger request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// A deposit address could not be produced.
    #[error("address allocation failed: {0}")]
    Allocation(String),
}

// ---------------------------------------------------------------------------
// Ledger Data
// ---------------------------------------------------------------------------

/// One transaction of a bundle, reduced to the fields verification reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The entry's own hash.
    pub hash: String,
    /// Recipient (or sender, for negative values) address.
    pub address: String,
    /// Transferred value in ledger units. Negative for inputs.
    pub value: i64,
    /// Raw signature/message fragment trytes. Decoded on demand.
    pub message_fragment: String,
    /// Position within the bundle.
    pub current_index: u64,
    /// Index of the bundle's last entry.
    pub last_index: u64,
    /// Bundle hash shared by all members.
    pub bundle: String,
}

impl LedgerEntry {
    /// Decodes the attached message. See [`trytes::decode_message`].
    pub fn message(&self) -> Result<String, TryteError> {
        trytes::decode_message(&self.message_fragment)
    }
}

/// All transactions of one bundle, tail first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub entries: Vec<LedgerEntry>,
}

impl Bundle {
    /// Entries whose own hash is `hash`. Normally zero or one.
    pub fn entries_with_hash<'a>(&'a self, hash: &'a str) -> impl Iterator<Item = &'a LedgerEntry> {
        self.entries.iter().filter(move |e| e.hash == hash)
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Narrow view of the ledger used by the transaction controller.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Produces the deposit address for a new purchase.
    async fn allocate_deposit_address(&self) -> Result<String, LedgerError>;

    /// Fetches the bundle whose tail transaction is `hash`.
    async fn fetch_bundle(&self, hash: &str) -> Result<Bundle, LedgerError>;
}

//! Ledger node client.
//!
//! Talks to a node over the legacy JSON command API (`getTrytes`) and
//! rebuilds the bundle by following trunk links from the tail. Each hop is
//! fetched by the hash the previous entry pointed at, so the entry hashes we
//! report are the ones we asked for; no local transaction hashing happens.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::address::AddressAllocator;
use super::trytes::{self, is_null, trytes_to_i64};
use super::{Bundle, LedgerEntry, LedgerError, LedgerGateway};
use crate::config::{HASH_LENGTH, LEDGER_API_VERSION, MAX_BUNDLE_LEN, TRANSACTION_TRYTES_LENGTH};

// ---------------------------------------------------------------------------
// Transaction Layout
// ---------------------------------------------------------------------------

const SIGNATURE_FRAGMENT: (usize, usize) = (0, 2187);
const ADDRESS: (usize, usize) = (2187, 2268);
const VALUE: (usize, usize) = (2268, 2295);
const CURRENT_INDEX: (usize, usize) = (2331, 2340);
const LAST_INDEX: (usize, usize) = (2340, 2349);
const BUNDLE: (usize, usize) = (2349, 2430);
const TRUNK: (usize, usize) = (2430, 2511);

fn field(trytes: &str, range: (usize, usize)) -> &str {
    &trytes[range.0..range.1]
}

/// A parsed transaction plus the trunk hash needed to continue traversal.
#[derive(Debug, Clone)]
pub struct ParsedTransaction {
    pub entry: LedgerEntry,
    pub trunk: String,
}

/// Parses raw transaction trytes fetched for `hash`.
pub fn parse_transaction(hash: &str, raw: &str) -> Result<ParsedTransaction, LedgerError> {
    if raw.len() != TRANSACTION_TRYTES_LENGTH {
        return Err(LedgerError::InvalidTrytes(trytes::TryteError::TooShort {
            expected: TRANSACTION_TRYTES_LENGTH,
            actual: raw.len(),
        }));
    }
    if !trytes::is_trytes(raw) {
        return Err(LedgerError::InvalidBundle(format!(
            "transaction {} contains non-tryte characters",
            hash
        )));
    }

    let current_index = trytes_to_i64(field(raw, CURRENT_INDEX))?;
    let last_index = trytes_to_i64(field(raw, LAST_INDEX))?;
    if current_index < 0 || last_index < 0 || current_index > last_index {
        return Err(LedgerError::InvalidBundle(format!(
            "transaction {} has index {}/{}",
            hash, current_index, last_index
        )));
    }

    Ok(ParsedTransaction {
        entry: LedgerEntry {
            hash: hash.to_string(),
            address: field(raw, ADDRESS).to_string(),
            value: trytes_to_i64(field(raw, VALUE))?,
            message_fragment: field(raw, SIGNATURE_FRAGMENT).to_string(),
            current_index: current_index as u64,
            last_index: last_index as u64,
            bundle: field(raw, BUNDLE).to_string(),
        },
        trunk: field(raw, TRUNK).to_string(),
    })
}

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GetTrytesRequest<'a> {
    command: &'static str,
    hashes: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct GetTrytesResponse {
    #[serde(default)]
    trytes: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// HttpLedgerGateway
// ---------------------------------------------------------------------------

/// [`LedgerGateway`] backed by a remote ledger node.
#[derive(Debug, Clone)]
pub struct HttpLedgerGateway {
    client: reqwest::Client,
    node_url: String,
    allocator: AddressAllocator,
}

impl HttpLedgerGateway {
    /// Creates a client for `node_url`. `request_timeout` bounds every
    /// individual node request.
    pub fn new(
        node_url: impl Into<String>,
        allocator: AddressAllocator,
        request_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            node_url: node_url.into(),
            allocator,
        })
    }

    /// Node URL this gateway talks to.
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    async fn get_trytes(&self, hash: &str) -> Result<String, LedgerError> {
        let started = Instant::now();
        let request = GetTrytesRequest {
            command: "getTrytes",
            hashes: [hash],
        };

        let response = self
            .client
            .post(&self.node_url)
            .header("X-IOTA-API-Version", LEDGER_API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, started))?;

        let status = response.status();
        let body: GetTrytesResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, started))?;

        if let Some(error) = body.error {
            return Err(LedgerError::Transport(format!("node error ({}): {}", status, error)));
        }
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("node answered {}", status)));
        }

        match body.trytes.into_iter().next() {
            Some(raw) if !is_null(&raw) => Ok(raw),
            _ => Err(LedgerError::NotFound {
                hash: hash.to_string(),
            }),
        }
    }
}

fn transport_error(err: reqwest::Error, started: Instant) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    } else {
        LedgerError::Transport(err.to_string())
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn allocate_deposit_address(&self) -> Result<String, LedgerError> {
        self.allocator.allocate().await
    }

    async fn fetch_bundle(&self, hash: &str) -> Result<Bundle, LedgerError> {
        if hash.len() != HASH_LENGTH || !trytes::is_trytes(hash) {
            return Err(LedgerError::NotFound {
                hash: hash.to_string(),
            });
        }

        let mut entries: Vec<LedgerEntry> = Vec::new();
        let mut next = hash.to_string();

        loop {
            let raw = match self.get_trytes(&next).await {
                Ok(raw) => raw,
                // A missing member means the bundle is incomplete, not that
                // the tail does not exist.
                Err(LedgerError::NotFound { .. }) if !entries.is_empty() => {
                    return Err(LedgerError::InvalidBundle(format!(
                        "bundle member {} is missing",
                        next
                    )));
                }
                Err(e) => return Err(e),
            };
            let parsed = parse_transaction(&next, &raw)?;
            let expected_index = entries.len() as u64;

            if parsed.entry.current_index != expected_index {
                return Err(LedgerError::InvalidBundle(format!(
                    "expected index {} at {}, found {}",
                    expected_index, next, parsed.entry.current_index
                )));
            }
            if let Some(tail) = entries.first() {
                if parsed.entry.bundle != tail.bundle || parsed.entry.last_index != tail.last_index {
                    return Err(LedgerError::InvalidBundle(format!(
                        "transaction {} does not belong to bundle {}",
                        next, tail.bundle
                    )));
                }
            }
            if parsed.entry.last_index as usize >= MAX_BUNDLE_LEN {
                return Err(LedgerError::InvalidBundle(format!(
                    "bundle of {} entries exceeds limit of {}",
                    parsed.entry.last_index + 1,
                    MAX_BUNDLE_LEN
                )));
            }

            let done = parsed.entry.current_index == parsed.entry.last_index;
            entries.push(parsed.entry);
            if done {
                break;
            }
            next = parsed.trunk;
        }

        tracing::debug!(hash = %hash, entries = entries.len(), "fetched bundle");
        Ok(Bundle { entries })
    }
}

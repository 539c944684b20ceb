//! # Shop Configuration & Constants
//!
//! Every magic number in tanglecart lives here, together with the
//! operator-facing [`ShopConfig`] that the node reads from `config.json`.
//!
//! The constants describe the ledger's wire format (tryte field widths) and
//! the default operating envelope (timeouts, cooldowns, ports). The ledger
//! constants are not ours to change: they are dictated by the transaction
//! layout of the network we verify against.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::address::has_valid_checksum;
use crate::ledger::trytes::is_trytes;

// ---------------------------------------------------------------------------
// Ledger Format
// ---------------------------------------------------------------------------

/// Length of a transaction hash, in trytes.
pub const HASH_LENGTH: usize = 81;

/// Length of an address without checksum, in trytes.
pub const ADDRESS_LENGTH: usize = 81;

/// Length of an address with the 9-tryte checksum appended.
pub const ADDRESS_WITH_CHECKSUM_LENGTH: usize = 90;

/// Length of a seed, in trytes.
pub const SEED_LENGTH: usize = 81;

/// Security level of seed-derived addresses. Level 2 is what wallets use by
/// default.
pub const SECURITY_LEVEL: usize = 2;

/// Length of a full serialized transaction, in trytes.
pub const TRANSACTION_TRYTES_LENGTH: usize = 2673;

/// Number of leading message-fragment trytes decoded into the payment
/// message. Two trytes per character, so this is 1093 characters.
pub const MESSAGE_TRYTES_LENGTH: usize = 2186;

/// Upper bound on bundle length we are willing to traverse. Real payment
/// bundles are a handful of entries; anything longer is treated as hostile.
pub const MAX_BUNDLE_LEN: usize = 64;

/// API version header value expected by legacy ledger nodes.
pub const LEDGER_API_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Default upper bound on a single ledger verification round trip.
/// Expiry counts as an invalid hash, never as an accepted payment.
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-player cooldown applied by the front-end between commands.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Front-end Defaults
// ---------------------------------------------------------------------------

/// Default HTTP port for the command API.
pub const DEFAULT_API_PORT: u16 = 9741;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

/// Default Source RCON port of the game server.
pub const DEFAULT_RCON_PORT: u16 = 25575;

/// Default public ledger node.
pub const DEFAULT_NODE_URL: &str = "https://nodes.thetangle.org:443";

/// Capacity of the outbound grant queue. Completions block briefly when the
/// executor falls this far behind.
pub const GRANT_QUEUE_CAPACITY: usize = 256;

/// File name of the operator configuration inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// File name of the product catalog inside the data directory.
pub const CATALOG_FILE_NAME: &str = "products.json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating the operator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// ShopConfig
// ---------------------------------------------------------------------------

/// How deposit addresses are chosen for new purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    /// Derive a fresh address per purchase from the configured seed.
    Seed,
    /// Hand out the same configured address for every purchase.
    Address,
}

/// How grant commands are executed once a purchase completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantMode {
    /// Only log the rendered commands. Useful for dry runs.
    Log,
    /// Send the commands to the game server console over RCON.
    Rcon,
}

/// Ledger node connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Base URL of the ledger node API.
    pub node_url: String,
    /// Verification round-trip timeout, in seconds.
    pub timeout_secs: u64,
}

/// Deposit address settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSection {
    pub mode: AddressMode,
    /// 81-tryte seed, used in [`AddressMode::Seed`]. Spaces are ignored.
    #[serde(default)]
    pub seed: String,
    /// Fixed deposit address, used in [`AddressMode::Address`].
    #[serde(default)]
    pub address: String,
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Database directory. Relative paths resolve against the data directory.
    pub path: PathBuf,
}

/// RCON connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RconSection {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Grant execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSection {
    pub mode: GrantMode,
    pub rcon: RconSection,
}

/// Front-end settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSection {
    pub port: u16,
    pub metrics_port: u16,
    /// Per-player cooldown between commands, in seconds. 0 disables it.
    pub cooldown_secs: u64,
}

/// Operator configuration, persisted as `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopConfig {
    pub ledger: LedgerSection,
    pub address: AddressSection,
    pub storage: StorageSection,
    pub grants: GrantSection,
    pub api: ApiSection,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerSection {
                node_url: DEFAULT_NODE_URL.to_string(),
                timeout_secs: DEFAULT_VERIFICATION_TIMEOUT.as_secs(),
            },
            address: AddressSection {
                mode: AddressMode::Seed,
                seed: String::new(),
                address: String::new(),
            },
            storage: StorageSection {
                path: PathBuf::from("db"),
            },
            grants: GrantSection {
                mode: GrantMode::Log,
                rcon: RconSection {
                    host: "127.0.0.1".to_string(),
                    port: DEFAULT_RCON_PORT,
                    password: String::new(),
                },
            },
            api: ApiSection {
                port: DEFAULT_API_PORT,
                metrics_port: DEFAULT_METRICS_PORT,
                cooldown_secs: DEFAULT_COOLDOWN.as_secs(),
            },
        }
    }
}

impl ShopConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ShopConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the default configuration, pretty-printed. Existing files are
    /// overwritten, so callers check for existence first.
    pub fn write_default(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::default();
        let body = serde_json::to_string_pretty(&config)?;
        fs::write(path, body).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// Checks that the selected address mode has usable material.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.address.mode {
            AddressMode::Seed => {
                let seed = self.normalized_seed();
                if seed.len() != SEED_LENGTH || !is_trytes(&seed) {
                    return Err(ConfigError::Invalid(format!(
                        "address.seed must be {} trytes (A-Z, 9)",
                        SEED_LENGTH
                    )));
                }
            }
            AddressMode::Address => {
                let address = &self.address.address;
                let len_ok = address.len() == ADDRESS_LENGTH
                    || address.len() == ADDRESS_WITH_CHECKSUM_LENGTH;
                if !len_ok || !is_trytes(address) {
                    return Err(ConfigError::Invalid(format!(
                        "address.address must be {} or {} trytes",
                        ADDRESS_LENGTH, ADDRESS_WITH_CHECKSUM_LENGTH
                    )));
                }
                if address.len() == ADDRESS_WITH_CHECKSUM_LENGTH && !has_valid_checksum(address) {
                    return Err(ConfigError::Invalid(
                        "address.address has a bad checksum".to_string(),
                    ));
                }
            }
        }

        if self.ledger.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ledger.timeout_secs must be > 0".to_string(),
            ));
        }

        if self.grants.mode == GrantMode::Rcon && self.grants.rcon.password.is_empty() {
            return Err(ConfigError::Invalid(
                "grants.rcon.password is required in rcon mode".to_string(),
            ));
        }

        Ok(())
    }

    /// The seed with the spaces operators like to paste in removed.
    pub fn normalized_seed(&self) -> String {
        self.address.seed.replace(' ', "")
    }

    /// Verification timeout as a [`Duration`].
    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.timeout_secs)
    }

    /// Front-end cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.api.cooldown_secs)
    }

    /// Database path, resolved against `data_dir` when relative.
    pub fn storage_path(&self, data_dir: &Path) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            data_dir.join(&self.storage.path)
        }
    }
}

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # tanglecart - Core Library
//!
//! Sell things for IOTA without running a wallet. A buyer asks for a
//! product, gets a deposit address and a payment message, sends the money
//! from whatever wallet they like, and hands back the transaction hash. We
//! look the hash up on the ledger, check that it carries the right message
//! and exactly the right amount, record the purchase, and grant it. Once.
//!
//! ## Architecture
//!
//! - **transaction** - Purchase records, the controller state machine,
//!   payment verification, and grant dispatch. The part that matters.
//! - **ledger** - Narrow adapter to the ledger: deposit addresses and bundle
//!   lookup. Node client, mock, and the tryte codec.
//! - **storage** - Persistence trait with in-memory and sled engines.
//! - **catalog** - Read-only product list.
//! - **config** - Ledger format constants and the operator config file.
//!
//! ## Design Philosophy
//!
//! 1. The ledger is hostile input. Hash, message and amount must all match.
//! 2. A purchase is granted only after its completion is on disk, and the
//!    store refuses to record it twice.
//! 3. Business outcomes (`HasPending`, `Rejected`, ...) are values, not
//!    errors. Errors mean the infrastructure failed.
//! 4. We verify and record. We never move funds.

pub mod catalog;
pub mod config;
pub mod ledger;
pub mod storage;
pub mod transaction;

pub use catalog::{Catalog, Product};
pub use config::ShopConfig;
pub use transaction::{
    CancelOutcome, CompleteOutcome, CompletedTransaction, PendingTransaction, PlayerId,
    StartOutcome, TransactionController,
};

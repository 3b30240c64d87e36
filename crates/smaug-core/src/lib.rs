// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Smaug Core - Ledger Persistence
//!
//! This crate owns the persistent state of the hosting platform: users and
//! their prepaid balances, whelps (metered containers), the price table, and
//! the pending/completed top-up ledger. It also provides the sticky
//! [`CircuitBreaker`] used by the reconciliation loops.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  smaug-environment                            │
//! │   Metering Engine · Top-up Engine · Container Reconciler      │
//! └──────────────────────────────────────────────────────────────┘
//!                              │ Arc<dyn LedgerStore>
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 smaug-core (This Crate)                       │
//! │     ┌────────────────┐            ┌────────────────┐          │
//! │     │ PostgresLedger │            │  SqliteLedger  │          │
//! │     └────────────────┘            └────────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `users` | Identity, balance (internal currency units), verified flag |
//! | `containers` | Whelps owned by users (software, tier, name, last error) |
//! | `prices` | Amount charged per billing tick for `(software, tier)` |
//! | `pending_transactions` | Top-ups awaiting gateway confirmation |
//! | `completed_transactions` | Append-only ledger of credited top-ups |
//!
//! # Balance Mutation
//!
//! Balances are never written back from a stale in-memory copy by the
//! engines. Debits and credits go through [`LedgerStore::adjust_balance`] and
//! [`LedgerStore::complete_top_up`], both of which apply the delta inside the
//! database.

#![deny(missing_docs)]

/// Sticky failure-threshold guard for reconciliation loops.
pub mod breaker;

/// Error types for ledger operations.
pub mod error;

/// Persistence interfaces and backends.
pub mod ledger;

/// Embedded database migrations.
pub mod migrations;

/// Ledger records and derived container status.
pub mod models;

pub use breaker::CircuitBreaker;
pub use error::LedgerError;
pub use ledger::LedgerStore;
pub use models::*;

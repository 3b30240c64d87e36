// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for smaug-core.

use thiserror::Error;

/// Ledger errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// User does not exist.
    #[error("User not found: {0}")]
    UserNotFound(i64),

    /// The connection URL names a database this crate has no backend for.
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

/// Result type using LedgerError.
pub type Result<T> = std::result::Result<T, LedgerError>;

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circuit breaker for reconciliation loops.
//!
//! A breaker counts registered errors and trips once the count exceeds its
//! configured maximum. Tripping is sticky: the breaker stays tripped until an
//! operator calls [`CircuitBreaker::reset`]. Each loop owns its breakers
//! exclusively, so the type takes `&mut self` and carries no locking.

use tracing::error;

/// Sticky failure-threshold guard.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    max_errors: u32,
    error_count: u32,
    tripped: bool,
}

impl CircuitBreaker {
    /// Create a breaker that trips after more than `max_errors` errors.
    pub fn new(name: impl Into<String>, max_errors: u32) -> Self {
        Self {
            name: name.into(),
            max_errors,
            error_count: 0,
            tripped: false,
        }
    }

    /// Breaker name (used in logs and fatal errors).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured error threshold.
    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// Errors registered since creation or the last reset.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Whether the breaker has tripped.
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Register an error. Returns `true` if the breaker is tripped afterwards.
    pub fn register_error(&mut self) -> bool {
        self.error_count = self.error_count.saturating_add(1);
        if self.error_count > self.max_errors && !self.tripped {
            error!(
                breaker = %self.name,
                error_count = self.error_count,
                max_errors = self.max_errors,
                severity = "critical",
                "Tripping circuit breaker"
            );
            self.tripped = true;
        }
        self.tripped
    }

    /// Clear the tripped flag and the error count.
    pub fn reset(&mut self) {
        self.tripped = false;
        self.error_count = 0;
    }
}

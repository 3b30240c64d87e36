// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Smaug Environment - Hosting Control Plane
//!
//! This crate runs the prepaid hosting platform: users top up a balance
//! through a payment gateway, and every minute each of their running game
//! servers ("whelps") is billed against it. When the balance runs out the
//! user's whelps are shut down.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Request layer (out of crate)                        │
//! │          provision · list · start · stop · delete · top-up · push        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   smaug-environment (This Crate)                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Container  │  │  Metering   │  │   Top-up    │  │   Balance   │     │
//! │  │ Reconciler  │  │   Engine    │  │   Poller    │  │    Push     │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │         │                          │
//!        │         │ ports                    │ events
//!        ▼         ▼                          ▼
//! ┌─────────────┐ ┌─────────────┐     ┌───────────────┐
//! │ Docker Swarm│ │    Redis    │     │    Stripe     │
//! └─────────────┘ └─────────────┘     └───────────────┘
//!        │
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                   smaug-core ledger (Postgres / SQLite)                │
//! │          users · containers · prices · pending/completed top-ups       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Background Loops
//!
//! | Loop | Period | Description |
//! |------|--------|-------------|
//! | Metering | 1 minute | Debit every up container, cascade shutdown at zero |
//! | Top-up poller | 1 second, backing off to 60 | Credit confirmed checkouts once |
//! | Balance push | 1 second | Send each subscriber its persisted balance |
//!
//! # Container Status
//!
//! The status of a whelp is derived from the most recent task of its
//! orchestrated service:
//!
//! | Latest task | Status |
//! |-------------|--------|
//! | none | `{up: false, state: stopped}` |
//! | `running` | `{up: true, state: running}` |
//! | anything else | `{up: false, state: <task state>}` |
//! | lookup failed | `{up: false, state: unknown}` |
//!
//! A service that no longer exists is re-created in the background.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SMAUG_DATABASE_URL` | Yes | - | `postgres://` or `sqlite:` ledger URL |
//! | `STRIPE_SECRET_KEY` | Yes | - | Stripe API key |
//! | `SMAUG_REDIS_URL` | No | in-process | Shared port allocator |
//! | `SMAUG_DOCKER_URL` | No | `http://127.0.0.1:2375` | Swarm manager API |
//! | `STRIPE_API_BASE` | No | `https://api.stripe.com` | Stripe API base |
//! | `FRONTEND_BASE_URL` | No | `http://localhost:3000` | Checkout redirects |
//! | `SMAUG_TOPUP_CONVERSION_FACTOR` | No | `10` | Credit per paid minor unit |
//! | `SMAUG_TOPUP_MAX_POLL_INTERVAL_SECS` | No | `60` | Backoff ceiling |
//! | `SMAUG_BREAKER_MAX_ERRORS` | No | `0` | Errors tolerated per breaker |
//! | `SMAUG_PORT_BASE` | No | `50000` | First published port |
//! | `SMAUG_METERING_CONCURRENCY` | No | `16` | Users billed in parallel |
//! | `SMAUG_SOFTWARE_REGISTRY` | No | built-in | JSON software profiles |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`containers`]: Request-level whelp operations
//! - [`error`]: Error types
//! - [`gateway`]: Payment gateway backends (Stripe, mock)
//! - [`metering`]: Per-minute billing
//! - [`notifier`]: Balance push
//! - [`orchestrator`]: Workload backends (Docker Swarm, mock)
//! - [`ports`]: Published port allocation
//! - [`reconciler`]: Whelp status and lifecycle commands
//! - [`runtime`]: Embeddable runtime
//! - [`schedule`]: Wall-clock alignment
//! - [`software`]: Software profiles
//! - [`topup`]: Top-up initiation and reconciliation

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Request-level whelp operations with ownership and balance checks.
pub mod containers;

/// Error types for environment operations.
pub mod error;

/// Payment gateway backends.
pub mod gateway;

/// Per-minute billing of running containers.
pub mod metering;

/// Per-second balance push to connected sessions.
pub mod notifier;

/// Workload orchestration backends.
pub mod orchestrator;

/// Published port allocation for services.
pub mod ports;

/// Status reconciliation and lifecycle commands for whelps.
pub mod reconciler;

/// Embeddable runtime for smaug-environment.
pub mod runtime;

/// Wall-clock alignment for scheduled loops.
pub mod schedule;

/// Software profiles used to build service specs.
pub mod software;

/// Top-up initiation and gateway reconciliation.
pub mod topup;

pub use config::Config;
pub use error::{Error, Result};

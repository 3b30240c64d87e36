// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Top-up initiation and reconciliation.
//!
//! A top-up starts with [`TopUpService::initiate`], which opens a hosted
//! checkout session and records a pending transaction before the session id
//! is handed back. Payment confirmation arrives asynchronously as gateway
//! events, which the [`TopUpPoller`] turns into ledger credits:
//!
//! ```text
//!   gateway event ──► session id ──► pending? ──yes──► credit + move to completed
//!                                        │
//!                                        no ──► completed? ──yes──► duplicate, ignore
//!                                                   │
//!                                                   no ──► STRIPE_HANDLE_EVENTS error
//! ```
//!
//! The poller starts at one poll per second. Rate limiting doubles the
//! interval; past the ceiling the `STRIPE_EVENT_POLL` breaker registers an
//! error. Any other gateway failure also registers a polling error and the
//! cycle is abandoned. A tripped breaker stops the poller with
//! [`Error::CircuitBreakerTripped`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use smaug_core::{CircuitBreaker, LedgerStore, PendingTransaction, TopUpOutcome};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ConfigError;
use crate::error::{Error, Result};
use crate::gateway::{
    CHECKOUT_COMPLETED, CheckoutRequest, CheckoutSession, GatewayError, GatewayEvent, LineItem,
    PaymentGateway,
};
use crate::schedule::until_next_boundary;

/// Name of the breaker guarding event polling.
pub const POLL_BREAKER: &str = "STRIPE_EVENT_POLL";

/// Name of the breaker guarding event handling.
pub const HANDLE_BREAKER: &str = "STRIPE_HANDLE_EVENTS";

/// Product name shown on the checkout page.
pub const CREDIT_PRODUCT_NAME: &str = "Smaug Hosting Credit";

/// Product description shown on the checkout page.
pub const CREDIT_PRODUCT_DESCRIPTION: &str = "Top-up of server credits";

/// Checkout currency.
pub const CREDIT_CURRENCY: &str = "gbp";

/// Configuration for top-ups.
#[derive(Debug, Clone)]
pub struct TopUpConfig {
    /// Internal units credited per paid minor currency unit.
    pub conversion_factor: i64,
    /// Initial (and post-recovery) poll interval.
    pub base_poll_interval: Duration,
    /// Ceiling of the rate-limit backoff.
    pub max_poll_interval: Duration,
    /// How far back each poll looks for events.
    pub lookback: Duration,
    /// Errors each breaker tolerates before tripping.
    pub breaker_max_errors: u32,
    /// Frontend base URL for checkout redirects.
    pub frontend_base_url: String,
}

impl Default for TopUpConfig {
    fn default() -> Self {
        Self {
            conversion_factor: 10,
            base_poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(60),
            lookback: Duration::from_secs(24 * 3600),
            breaker_max_errors: 0,
            frontend_base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Resolve `path` against `base` the way a browser resolves a link.
pub fn resolve_url(base: &str, path: &str) -> std::result::Result<String, url::ParseError> {
    Ok(Url::parse(base)?.join(path)?.to_string())
}

/// Opens checkout sessions and records pending transactions.
#[derive(Clone)]
pub struct TopUpService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    conversion_factor: i64,
    success_url: String,
    cancel_url: String,
}

impl TopUpService {
    /// Create a new top-up service.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: &TopUpConfig,
    ) -> Result<Self> {
        let invalid_base = |_| ConfigError::InvalidValue {
            var: "FRONTEND_BASE_URL",
            value: config.frontend_base_url.clone(),
        };
        let success_url =
            resolve_url(&config.frontend_base_url, "/topup/success").map_err(invalid_base)?;
        let cancel_url =
            resolve_url(&config.frontend_base_url, "/topup/cancelled").map_err(invalid_base)?;

        Ok(Self {
            ledger,
            gateway,
            conversion_factor: config.conversion_factor,
            success_url,
            cancel_url,
        })
    }

    /// Redirect after a successful payment.
    pub fn success_url(&self) -> &str {
        &self.success_url
    }

    /// Redirect after a cancelled payment.
    pub fn cancel_url(&self) -> &str {
        &self.cancel_url
    }

    /// Open a checkout for `amount` minor currency units.
    ///
    /// The pending transaction (`amount × conversion factor` internal units)
    /// is persisted before the session is returned.
    pub async fn initiate(&self, user_id: i64, amount: i64) -> Result<CheckoutSession> {
        if amount <= 0 {
            return Err(Error::InvalidRequest(format!(
                "top-up amount must be positive, got {}",
                amount
            )));
        }
        let credit = amount.checked_mul(self.conversion_factor).ok_or_else(|| {
            Error::InvalidRequest(format!("top-up amount too large: {}", amount))
        })?;

        let request = CheckoutRequest {
            line_items: vec![LineItem {
                name: CREDIT_PRODUCT_NAME.to_string(),
                description: CREDIT_PRODUCT_DESCRIPTION.to_string(),
                amount,
                currency: CREDIT_CURRENCY.to_string(),
                quantity: 1,
            }],
            payment_method_types: vec!["card".to_string()],
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
            client_reference_id: Some(user_id.to_string()),
        };

        let session = self
            .gateway
            .create_checkout_session(&request)
            .await
            .inspect_err(|e| {
                error!(user_id, error = %e, "Could not create checkout session");
            })?;

        self.ledger
            .insert_pending_transaction(&PendingTransaction {
                user_id,
                amount: credit,
                checkout_id: session.id.clone(),
            })
            .await
            .inspect_err(|e| {
                error!(
                    user_id,
                    checkout_id = %session.id,
                    error = %e,
                    severity = "critical",
                    "Could not record pending transaction"
                );
            })?;

        info!(user_id, checkout_id = %session.id, amount, credit, "Top-up initiated");
        Ok(session)
    }
}

/// Summary of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Events returned by the gateway.
    pub events: usize,
    /// Checkouts credited.
    pub credited: usize,
    /// Events for checkouts that were already credited.
    pub duplicates: usize,
    /// Events that registered a handling error.
    pub failed: usize,
    /// The gateway rate-limited this poll.
    pub rate_limited: bool,
    /// The gateway failed this poll for another reason.
    pub poll_failed: bool,
}

/// Background loop that credits confirmed checkouts.
///
/// Owns both circuit breakers; nothing else registers errors against them.
pub struct TopUpPoller {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: TopUpConfig,
    interval: Duration,
    poll_breaker: CircuitBreaker,
    handle_breaker: CircuitBreaker,
    shutdown: Arc<Notify>,
}

impl TopUpPoller {
    /// Create a new poller.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: TopUpConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            interval: config.base_poll_interval,
            poll_breaker: CircuitBreaker::new(POLL_BREAKER, config.breaker_max_errors),
            handle_breaker: CircuitBreaker::new(HANDLE_BREAKER, config.breaker_max_errors),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Current poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.interval
    }

    /// The polling breaker.
    pub fn poll_breaker(&self) -> &CircuitBreaker {
        &self.poll_breaker
    }

    /// The event-handling breaker.
    pub fn handle_breaker(&self) -> &CircuitBreaker {
        &self.handle_breaker
    }

    /// Operator reset: clear both breakers and the backoff.
    pub fn reset(&mut self) {
        warn!("Resetting top-up circuit breakers");
        self.poll_breaker.reset();
        self.handle_breaker.reset();
        self.interval = self.config.base_poll_interval;
    }

    fn check_breakers(&self) -> Result<()> {
        for breaker in [&self.poll_breaker, &self.handle_breaker] {
            if breaker.is_tripped() {
                return Err(Error::CircuitBreakerTripped {
                    name: breaker.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run the polling loop until shutdown or until a breaker trips.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            base_interval_ms = self.config.base_poll_interval.as_millis() as u64,
            max_interval_secs = self.config.max_poll_interval.as_secs(),
            "Top-up poller started"
        );

        loop {
            let wait = until_next_boundary(Utc::now(), self.interval);

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Top-up poller received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(wait) => {
                    let report = self.poll_once().await?;
                    if report.events > 0 {
                        debug!(
                            events = report.events,
                            credited = report.credited,
                            duplicates = report.duplicates,
                            failed = report.failed,
                            "Processed checkout events"
                        );
                    }

                    if let Err(e) = self.check_breakers() {
                        error!(
                            error = %e,
                            severity = "critical",
                            "Circuit breaker tripped, halting top-up polling"
                        );
                        return Err(e);
                    }
                }
            }
        }

        info!("Top-up poller stopped");
        Ok(())
    }

    /// Poll the gateway once and credit every confirmed checkout.
    ///
    /// Fails only if a breaker was already tripped.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        self.check_breakers()?;

        let mut report = PollReport::default();
        let lookback = chrono::Duration::from_std(self.config.lookback)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let since = Utc::now() - lookback;

        let events = match self.gateway.list_events(CHECKOUT_COMPLETED, since).await {
            Ok(events) => events,
            Err(GatewayError::RateLimited) => {
                report.rate_limited = true;
                self.back_off();
                return Ok(report);
            }
            Err(e) => {
                error!(error = %e, severity = "critical", "Could not fetch events from gateway");
                report.poll_failed = true;
                self.poll_breaker.register_error();
                return Ok(report);
            }
        };

        self.interval = self.config.base_poll_interval;
        report.events = events.len();

        for event in &events {
            self.handle_event(event, &mut report).await;
        }

        Ok(report)
    }

    fn back_off(&mut self) {
        let doubled = self.interval.saturating_mul(2);
        if doubled > self.config.max_poll_interval {
            error!(
                interval_secs = self.interval.as_secs(),
                max_interval_secs = self.config.max_poll_interval.as_secs(),
                severity = "critical",
                "Rate limited beyond the poll interval ceiling"
            );
            self.interval = self.config.max_poll_interval;
            self.poll_breaker.register_error();
        } else {
            warn!(
                interval_ms = doubled.as_millis() as u64,
                "Rate limited by gateway, backing off"
            );
            self.interval = doubled;
        }
    }

    async fn handle_event(&mut self, event: &GatewayEvent, report: &mut PollReport) {
        let Some(checkout_id) = event.checkout_session_id() else {
            error!(
                event_id = %event.id,
                severity = "critical",
                "Could not read checkout session from event"
            );
            report.failed += 1;
            self.handle_breaker.register_error();
            return;
        };

        match self.ledger.complete_top_up(checkout_id).await {
            Ok(TopUpOutcome::Credited {
                user_id,
                amount,
                balance,
            }) => {
                info!(user_id, checkout_id = %checkout_id, amount, balance, "Credited top-up");
                report.credited += 1;
            }
            Ok(TopUpOutcome::AlreadyCompleted) => {
                debug!(checkout_id = %checkout_id, "Checkout already credited");
                report.duplicates += 1;
            }
            Ok(TopUpOutcome::Unknown) => {
                error!(
                    event_id = %event.id,
                    checkout_id = %checkout_id,
                    severity = "critical",
                    "Checkout is neither pending nor completed"
                );
                report.failed += 1;
                self.handle_breaker.register_error();
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    checkout_id = %checkout_id,
                    error = %e,
                    severity = "critical",
                    "Could not credit checkout"
                );
                report.failed += 1;
                self.handle_breaker.register_error();
            }
        }
    }
}

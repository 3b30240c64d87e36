// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock payment gateway for testing.
//!
//! Checkout sessions are numbered `cs_1`, `cs_2`, ... and completed payments
//! are simulated by pushing events. Failures of `list_events` can be queued
//! one call at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::traits::*;

/// A queued `list_events` failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Respond with a rate-limit error.
    RateLimited,
    /// Respond with a server error.
    Unavailable,
}

/// Mock payment gateway for testing.
pub struct MockGateway {
    checkouts: Arc<Mutex<Vec<CheckoutRequest>>>,
    events: Arc<Mutex<Vec<GatewayEvent>>>,
    failures: Arc<Mutex<VecDeque<MockFailure>>>,
    next_session: AtomicUsize,
    next_event: AtomicUsize,
    list_calls: AtomicUsize,
    /// If true, checkout creation fails
    pub fail_checkout: bool,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Create a new mock gateway.
    pub fn new() -> Self {
        Self {
            checkouts: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            next_session: AtomicUsize::new(1),
            next_event: AtomicUsize::new(1),
            list_calls: AtomicUsize::new(0),
            fail_checkout: false,
        }
    }

    /// Create a mock gateway whose checkout creation always fails.
    pub fn failing() -> Self {
        Self {
            fail_checkout: true,
            ..Self::new()
        }
    }

    /// Emit a `checkout.session.completed` event for a session.
    pub async fn complete_checkout(&self, session_id: &str) {
        let id = format!("evt_{}", self.next_event.fetch_add(1, Ordering::SeqCst));
        self.push_event(GatewayEvent {
            id,
            kind: CHECKOUT_COMPLETED.to_string(),
            created: Utc::now(),
            data: serde_json::json!({
                "object": {"object": "checkout.session", "id": session_id}
            }),
        })
        .await;
    }

    /// Add an arbitrary event.
    pub async fn push_event(&self, event: GatewayEvent) {
        self.events.lock().await.push(event);
    }

    /// Make the next `list_events` call fail.
    pub async fn fail_next_list(&self, failure: MockFailure) {
        self.failures.lock().await.push_back(failure);
    }

    /// Checkout requests received so far.
    pub async fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().await.clone()
    }

    /// Number of `list_events` calls, including failed ones.
    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn gateway_type(&self) -> &'static str {
        "mock"
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if self.fail_checkout {
            return Err(GatewayError::Api {
                status: 500,
                message: "Mock checkout failure".to_string(),
            });
        }

        self.checkouts.lock().await.push(request.clone());
        let id = format!("cs_{}", self.next_session.fetch_add(1, Ordering::SeqCst));

        Ok(CheckoutSession {
            url: Some(format!("https://checkout.example.com/pay/{}", id)),
            id,
        })
    }

    async fn list_events(
        &self,
        kind: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<GatewayEvent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.failures.lock().await.pop_front() {
            return Err(match failure {
                MockFailure::RateLimited => GatewayError::RateLimited,
                MockFailure::Unavailable => GatewayError::Api {
                    status: 503,
                    message: "Mock gateway unavailable".to_string(),
                },
            });
        }

        Ok(self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| e.kind == kind && e.created > created_after)
            .cloned()
            .collect())
    }
}

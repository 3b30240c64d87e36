// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payment gateway trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Event type emitted when a hosted checkout is paid.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Errors from payment gateway operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The gateway asked us to slow down.
    #[error("Rate limited by payment gateway")]
    RateLimited,

    /// The gateway rejected the request.
    #[error("Gateway API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message returned by the gateway.
        message: String,
    },

    /// The gateway could not be reached.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway returned something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether this error is a rate limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited)
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// One purchasable line of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product name.
    pub name: String,
    /// Product description.
    pub description: String,
    /// Unit amount in the currency's minor unit.
    pub amount: i64,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// Quantity.
    pub quantity: u64,
}

/// Parameters of a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Items being paid for.
    pub line_items: Vec<LineItem>,
    /// Accepted payment methods.
    pub payment_method_types: Vec<String>,
    /// Redirect after successful payment.
    pub success_url: String,
    /// Redirect after cancelled payment.
    pub cancel_url: String,
    /// Our reference for the paying user.
    pub client_reference_id: Option<String>,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Session id; also the ledger's checkout id.
    pub id: String,
    /// Hosted payment page, if the gateway returned one.
    pub url: Option<String>,
}

/// A gateway event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Event id.
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created: DateTime<Utc>,
    /// Event payload.
    pub data: Value,
}

impl GatewayEvent {
    /// Checkout session id carried by a `checkout.session.completed` event.
    pub fn checkout_session_id(&self) -> Option<&str> {
        let object = self.data.get("object")?;
        if object.get("object").and_then(Value::as_str) != Some("checkout.session") {
            return None;
        }
        object.get("id").and_then(Value::as_str)
    }
}

/// Trait for payment gateways.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway type identifier (e.g., "stripe", "mock")
    fn gateway_type(&self) -> &'static str;

    /// Create a hosted checkout session.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// List every event of `kind` created strictly after `created_after`.
    ///
    /// Implementations fetch all pages before returning, so a failure never
    /// yields a partial list.
    async fn list_events(&self, kind: &str, created_after: DateTime<Utc>)
    -> Result<Vec<GatewayEvent>>;
}

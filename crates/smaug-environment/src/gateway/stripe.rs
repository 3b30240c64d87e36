// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stripe payment gateway.
//!
//! Talks to the Stripe REST API directly: checkout sessions are created with
//! form-encoded `POST /v1/checkout/sessions`, events are read with paginated
//! `GET /v1/events`. HTTP 429 maps to [`GatewayError::RateLimited`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::traits::*;

/// Events requested per page.
const PAGE_SIZE: u32 = 100;

/// Upper bound on pages fetched per listing.
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct EventList {
    data: Vec<GatewayEvent>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Stripe-backed payment gateway.
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    /// Create a gateway using `secret_key` against `api_base`
    /// (normally `https://api.stripe.com`).
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(client, api_base, secret_key))
    }

    /// Create a gateway with a preconfigured HTTP client.
    pub fn with_client(
        client: Client,
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

/// Flatten a checkout request into Stripe's bracketed form encoding.
fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    for (i, method) in request.payment_method_types.iter().enumerate() {
        form.push((format!("payment_method_types[{}]", i), method.clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        form.push((
            format!("{}[price_data][currency]", prefix),
            item.currency.clone(),
        ));
        form.push((
            format!("{}[price_data][unit_amount]", prefix),
            item.amount.to_string(),
        ));
        form.push((
            format!("{}[price_data][product_data][name]", prefix),
            item.name.clone(),
        ));
        form.push((
            format!("{}[price_data][product_data][description]", prefix),
            item.description.clone(),
        ));
    }

    if let Some(reference) = &request.client_reference_id {
        form.push(("client_reference_id".to_string(), reference.clone()));
    }

    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn gateway_type(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(request))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let session: SessionResponse = Self::decode(response).await?;

        debug!(session_id = %session.id, "Created checkout session");
        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn list_events(
        &self,
        kind: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<GatewayEvent>> {
        let mut events = Vec::new();
        let mut starting_after: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("type".to_string(), kind.to_string()),
                (
                    "created[gt]".to_string(),
                    created_after.timestamp().to_string(),
                ),
                ("limit".to_string(), PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = &starting_after {
                query.push(("starting_after".to_string(), cursor.clone()));
            }

            let response = self
                .client
                .get(self.url("/v1/events"))
                .bearer_auth(&self.secret_key)
                .query(&query)
                .send()
                .await?;
            let response = Self::check(response).await?;
            let page: EventList = Self::decode(response).await?;

            starting_after = page.data.last().map(|e| e.id.clone());
            let has_more = page.has_more && starting_after.is_some();
            events.extend(page.data);

            if !has_more {
                return Ok(events);
            }
        }

        Err(GatewayError::InvalidResponse(format!(
            "event listing exceeded {} pages",
            MAX_PAGES
        )))
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for smaug-environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger database URL (`postgres://...` or `sqlite:...`)
    pub database_url: String,
    /// Redis URL for the shared port allocator (in-process allocator if unset)
    pub redis_url: Option<String>,
    /// Docker Engine API base URL of a swarm manager
    pub docker_url: String,
    /// Stripe secret key
    pub stripe_secret_key: String,
    /// Stripe API base URL
    pub stripe_api_base: String,
    /// Frontend base URL used for checkout redirects
    pub frontend_base_url: String,
    /// Internal units credited per unit of paid currency
    pub conversion_factor: i64,
    /// Ceiling for the top-up poll interval backoff
    pub max_poll_interval: Duration,
    /// Errors a breaker tolerates before tripping
    pub breaker_max_errors: u32,
    /// First published port handed out by the allocator
    pub port_base: u16,
    /// Users billed concurrently within one metering tick
    pub metering_concurrency: usize,
    /// Optional JSON file with software profiles
    pub software_registry: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("SMAUG_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SMAUG_DATABASE_URL"))?;

        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("STRIPE_SECRET_KEY"))?;

        let redis_url = std::env::var("SMAUG_REDIS_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let docker_url = std::env::var("SMAUG_DOCKER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:2375".to_string());

        let stripe_api_base = std::env::var("STRIPE_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());

        let frontend_base_url = std::env::var("FRONTEND_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let conversion_factor: i64 = parse_var("SMAUG_TOPUP_CONVERSION_FACTOR", 10)?;
        if conversion_factor <= 0 {
            return Err(ConfigError::InvalidValue {
                var: "SMAUG_TOPUP_CONVERSION_FACTOR",
                value: conversion_factor.to_string(),
            });
        }

        let max_poll_secs: u64 = parse_var("SMAUG_TOPUP_MAX_POLL_INTERVAL_SECS", 60)?;
        let breaker_max_errors: u32 = parse_var("SMAUG_BREAKER_MAX_ERRORS", 0)?;

        let port_base: u16 = std::env::var("SMAUG_PORT_BASE")
            .unwrap_or_else(|_| "50000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let metering_concurrency: usize = parse_var("SMAUG_METERING_CONCURRENCY", 16)?;

        let software_registry = std::env::var("SMAUG_SOFTWARE_REGISTRY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            database_url,
            redis_url,
            docker_url,
            stripe_secret_key,
            stripe_api_base,
            frontend_base_url,
            conversion_factor,
            max_poll_interval: Duration::from_secs(max_poll_secs.max(1)),
            breaker_max_errors,
            port_base,
            metering_concurrency: metering_concurrency.max(1),
            software_registry,
        })
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable could not be parsed.
    #[error("Invalid value for {var}: {value}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
}

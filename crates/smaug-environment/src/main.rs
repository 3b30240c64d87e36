// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Smaug Environment - Hosting Control Plane Server
//!
//! A background service responsible for:
//! - Metering running whelps every minute
//! - Crediting confirmed top-ups
//! - Pushing balances to connected sessions

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use smaug_environment::config::Config;
use smaug_environment::gateway::{PaymentGateway, StripeGateway};
use smaug_environment::metering::MeteringConfig;
use smaug_environment::orchestrator::{Orchestrator, SwarmOrchestrator};
use smaug_environment::ports::{InMemoryPortAllocator, PortAllocator, RedisPortAllocator};
use smaug_environment::runtime::SmaugRuntime;
use smaug_environment::software::SoftwareRegistry;
use smaug_environment::topup::TopUpConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smaug_environment=info,smaug_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        docker_url = %config.docker_url,
        stripe_api_base = %config.stripe_api_base,
        redis = config.redis_url.is_some(),
        "Starting Smaug Environment"
    );

    // Connect to the ledger and apply migrations
    let ledger = smaug_core::ledger::connect(&config.database_url, 10).await?;
    info!("Connected to ledger");

    let ports: Arc<dyn PortAllocator> = match &config.redis_url {
        Some(url) => Arc::new(RedisPortAllocator::connect(url, config.port_base).await?),
        None => {
            warn!("SMAUG_REDIS_URL not set, port allocations will not survive restarts");
            Arc::new(InMemoryPortAllocator::new(config.port_base))
        }
    };

    let orchestrator = Arc::new(SwarmOrchestrator::new(&config.docker_url)?);
    info!(
        orchestrator_type = orchestrator.orchestrator_type(),
        "Orchestrator initialized"
    );

    let gateway = Arc::new(StripeGateway::new(
        &config.stripe_api_base,
        &config.stripe_secret_key,
    )?);
    info!(gateway_type = gateway.gateway_type(), "Gateway initialized");

    let software = match &config.software_registry {
        Some(path) => SoftwareRegistry::load(path)?,
        None => SoftwareRegistry::builtin(),
    };

    // Start the runtime
    let mut runtime = SmaugRuntime::builder()
        .ledger(ledger)
        .orchestrator(orchestrator)
        .ports(ports)
        .gateway(gateway)
        .software(software)
        .metering(MeteringConfig {
            concurrency: config.metering_concurrency,
            ..MeteringConfig::default()
        })
        .topup(TopUpConfig {
            conversion_factor: config.conversion_factor,
            max_poll_interval: config.max_poll_interval,
            breaker_max_errors: config.breaker_max_errors,
            frontend_base_url: config.frontend_base_url.clone(),
            ..TopUpConfig::default()
        })
        .notify_period(Duration::from_secs(1))
        .build()?
        .start()
        .await?;

    info!("Smaug Environment ready");

    // Wait for shutdown signal, or for the top-up poller to halt
    let halted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
            None
        }
        result = runtime.topup_finished() => Some(result),
    };

    // Graceful shutdown
    runtime.shutdown().await?;

    if let Some(Err(e)) = halted {
        error!(error = %e, severity = "critical", "Top-up poller halted");
        return Err(e);
    }

    info!("Smaug Environment shut down");

    Ok(())
}

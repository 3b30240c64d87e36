// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for smaug-environment.
//!
//! [`SmaugRuntime`] wires the ledger and adapters into the container
//! services and starts the three background loops: metering, top-up
//! polling, and balance push.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use smaug_environment::gateway::StripeGateway;
//! use smaug_environment::orchestrator::SwarmOrchestrator;
//! use smaug_environment::ports::InMemoryPortAllocator;
//! use smaug_environment::runtime::SmaugRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ledger = smaug_core::ledger::connect("sqlite:smaug.db", 5).await?;
//!
//!     let mut runtime = SmaugRuntime::builder()
//!         .ledger(ledger)
//!         .orchestrator(Arc::new(SwarmOrchestrator::new("http://127.0.0.1:2375")?))
//!         .ports(Arc::new(InMemoryPortAllocator::new(50000)))
//!         .gateway(Arc::new(StripeGateway::new("https://api.stripe.com", "sk_test_...")?))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let whelps = runtime.containers().list_with_status(1).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use smaug_core::LedgerStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::containers::ContainerService;
use crate::gateway::PaymentGateway;
use crate::metering::{MeteringConfig, MeteringEngine};
use crate::notifier::{BalanceNotifier, NotificationLoop, SubscriberRegistry};
use crate::orchestrator::Orchestrator;
use crate::ports::PortAllocator;
use crate::reconciler::ContainerReconciler;
use crate::software::SoftwareRegistry;
use crate::topup::{TopUpConfig, TopUpPoller, TopUpService};

/// Builder for creating a [`SmaugRuntime`].
pub struct SmaugRuntimeBuilder {
    ledger: Option<Arc<dyn LedgerStore>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    ports: Option<Arc<dyn PortAllocator>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    software: Arc<SoftwareRegistry>,
    metering: MeteringConfig,
    topup: TopUpConfig,
    notify_period: Duration,
}

impl Default for SmaugRuntimeBuilder {
    fn default() -> Self {
        Self {
            ledger: None,
            orchestrator: None,
            ports: None,
            gateway: None,
            software: Arc::new(SoftwareRegistry::builtin()),
            metering: MeteringConfig::default(),
            topup: TopUpConfig::default(),
            notify_period: Duration::from_secs(1),
        }
    }
}

impl SmaugRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ledger (required).
    pub fn ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the container orchestrator (required).
    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Set the published port allocator (required).
    pub fn ports(mut self, ports: Arc<dyn PortAllocator>) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Set the payment gateway (required).
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the software registry.
    ///
    /// Default: [`SoftwareRegistry::builtin`]
    pub fn software(mut self, software: SoftwareRegistry) -> Self {
        self.software = Arc::new(software);
        self
    }

    /// Set the metering configuration.
    ///
    /// Default: 60 second period, 16 users in parallel
    pub fn metering(mut self, config: MeteringConfig) -> Self {
        self.metering = config;
        self
    }

    /// Set the top-up configuration.
    pub fn topup(mut self, config: TopUpConfig) -> Self {
        self.topup = config;
        self
    }

    /// Set the balance push period.
    ///
    /// Default: 1 second
    pub fn notify_period(mut self, period: Duration) -> Self {
        self.notify_period = period;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing or the frontend base
    /// URL cannot be parsed.
    pub fn build(self) -> Result<SmaugRuntimeConfig> {
        let ledger = self
            .ledger
            .ok_or_else(|| anyhow::anyhow!("ledger is required"))?;
        let orchestrator = self
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("orchestrator is required"))?;
        let ports = self
            .ports
            .ok_or_else(|| anyhow::anyhow!("ports is required"))?;
        let gateway = self
            .gateway
            .ok_or_else(|| anyhow::anyhow!("gateway is required"))?;

        let topups = TopUpService::new(ledger.clone(), gateway.clone(), &self.topup)?;

        Ok(SmaugRuntimeConfig {
            ledger,
            orchestrator,
            ports,
            gateway,
            software: self.software,
            metering: self.metering,
            topup: self.topup,
            notify_period: self.notify_period,
            topups,
        })
    }
}

/// Configuration for a [`SmaugRuntime`].
pub struct SmaugRuntimeConfig {
    ledger: Arc<dyn LedgerStore>,
    orchestrator: Arc<dyn Orchestrator>,
    ports: Arc<dyn PortAllocator>,
    gateway: Arc<dyn PaymentGateway>,
    software: Arc<SoftwareRegistry>,
    metering: MeteringConfig,
    topup: TopUpConfig,
    notify_period: Duration,
    topups: TopUpService,
}

impl SmaugRuntimeConfig {
    /// Start the runtime, spawning the metering, top-up, and push loops.
    pub async fn start(self) -> Result<SmaugRuntime> {
        let reconciler = ContainerReconciler::new(
            self.ledger.clone(),
            self.orchestrator.clone(),
            self.ports.clone(),
            self.software.clone(),
        );
        let containers = ContainerService::new(self.ledger.clone(), reconciler.clone());

        let metering = MeteringEngine::new(
            self.ledger.clone(),
            reconciler.clone(),
            self.metering.clone(),
        );
        let metering_shutdown = metering.shutdown_handle();
        let metering_handle = tokio::spawn(async move {
            metering.run().await;
        });

        let mut poller = TopUpPoller::new(
            self.ledger.clone(),
            self.gateway.clone(),
            self.topup.clone(),
        );
        let topup_shutdown = poller.shutdown_handle();
        let topup_handle = tokio::spawn(async move { poller.run().await });

        let notifier = BalanceNotifier::new(self.ledger.clone());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let push_loop = NotificationLoop::new(
            notifier.clone(),
            subscribers.clone(),
            self.notify_period,
        );
        let notify_shutdown = push_loop.shutdown_handle();
        let notify_handle = tokio::spawn(async move {
            push_loop.run().await;
        });

        info!(
            orchestrator = self.orchestrator.orchestrator_type(),
            gateway = self.gateway.gateway_type(),
            software = ?self.software.names(),
            "SmaugRuntime started"
        );

        Ok(SmaugRuntime {
            reconciler,
            containers,
            topups: self.topups,
            notifier,
            subscribers,
            metering_handle,
            topup_handle: Some(topup_handle),
            notify_handle,
            metering_shutdown,
            topup_shutdown,
            notify_shutdown,
        })
    }
}

/// A running control plane.
///
/// The runtime manages:
/// - Metering engine billing up containers every period
/// - Top-up poller crediting confirmed checkouts
/// - Balance push loop for connected sessions
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SmaugRuntime {
    reconciler: ContainerReconciler,
    containers: ContainerService,
    topups: TopUpService,
    notifier: BalanceNotifier,
    subscribers: Arc<SubscriberRegistry>,
    metering_handle: JoinHandle<()>,
    topup_handle: Option<JoinHandle<crate::Result<()>>>,
    notify_handle: JoinHandle<()>,
    metering_shutdown: Arc<Notify>,
    topup_shutdown: Arc<Notify>,
    notify_shutdown: Arc<Notify>,
}

impl SmaugRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SmaugRuntimeBuilder {
        SmaugRuntimeBuilder::new()
    }

    /// Whelp operations for the request layer.
    pub fn containers(&self) -> &ContainerService {
        &self.containers
    }

    /// Top-up initiation for the request layer.
    pub fn topups(&self) -> &TopUpService {
        &self.topups
    }

    /// Balance reads for the request layer.
    pub fn notifier(&self) -> &BalanceNotifier {
        &self.notifier
    }

    /// Registry of sessions receiving balance pushes.
    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    /// The shared container reconciler.
    pub fn reconciler(&self) -> &ContainerReconciler {
        &self.reconciler
    }

    /// Wait until the top-up poller stops on its own.
    ///
    /// Resolves with an error when a circuit breaker trips. Never resolves
    /// once the poller has already been awaited.
    pub async fn topup_finished(&mut self) -> Result<()> {
        let Some(handle) = self.topup_handle.as_mut() else {
            return std::future::pending().await;
        };

        let result = handle.await;
        self.topup_handle = None;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("top-up poller task panicked: {}", e)),
        }
    }

    /// Check if every background loop is still running.
    pub fn is_running(&self) -> bool {
        !self.metering_handle.is_finished()
            && self
                .topup_handle
                .as_ref()
                .is_some_and(|h| !h.is_finished())
            && !self.notify_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals every loop to stop, waits for them, then waits for
    /// outstanding background creates, removes, and cascading shutdowns.
    pub async fn shutdown(self) -> Result<()> {
        info!("SmaugRuntime shutting down...");

        self.metering_shutdown.notify_one();
        self.topup_shutdown.notify_one();
        self.notify_shutdown.notify_one();

        if let Err(e) = self.metering_handle.await {
            error!("Metering engine task panicked: {}", e);
        }

        if let Err(e) = self.notify_handle.await {
            error!("Balance push task panicked: {}", e);
        }

        let topup_result = match self.topup_handle {
            Some(handle) => match handle.await {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(e) => {
                    error!("Top-up poller task panicked: {}", e);
                    Err(anyhow::anyhow!("top-up poller task panicked: {}", e))
                }
            },
            None => Ok(()),
        };

        self.reconciler.wait_for_background().await;

        match &topup_result {
            Ok(()) => info!("SmaugRuntime shutdown complete"),
            Err(e) => error!("SmaugRuntime top-up poller error during shutdown: {}", e),
        }
        topup_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::orchestrator::MockOrchestrator;
    use crate::ports::InMemoryPortAllocator;
    use smaug_core::ledger::SqliteLedger;

    #[test]
    fn test_builder_default_values() {
        let builder = SmaugRuntimeBuilder::default();

        assert!(builder.ledger.is_none());
        assert!(builder.orchestrator.is_none());
        assert!(builder.ports.is_none());
        assert!(builder.gateway.is_none());
        assert!(builder.software.contains("minecraft"));
        assert_eq!(builder.metering.period, Duration::from_secs(60));
        assert_eq!(builder.notify_period, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_build_fails_without_ledger() {
        let result = SmaugRuntimeBuilder::new().build();

        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("ledger is required"));
        }
    }

    #[tokio::test]
    async fn test_builder_build_fails_without_gateway() {
        let ledger = SqliteLedger::connect("sqlite::memory:", 1).await.unwrap();
        let result = SmaugRuntime::builder()
            .ledger(Arc::new(ledger))
            .orchestrator(Arc::new(MockOrchestrator::new()))
            .ports(Arc::new(InMemoryPortAllocator::new(50000)))
            .build();

        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("gateway is required"));
        }
    }

    #[tokio::test]
    async fn test_builder_rejects_bad_frontend_url() {
        let ledger = SqliteLedger::connect("sqlite::memory:", 1).await.unwrap();
        let result = SmaugRuntime::builder()
            .ledger(Arc::new(ledger))
            .orchestrator(Arc::new(MockOrchestrator::new()))
            .ports(Arc::new(InMemoryPortAllocator::new(50000)))
            .gateway(Arc::new(MockGateway::new()))
            .topup(TopUpConfig {
                frontend_base_url: "not a url".to_string(),
                ..TopUpConfig::default()
            })
            .build();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let ledger = SqliteLedger::connect("sqlite::memory:", 1).await.unwrap();
        let runtime = SmaugRuntime::builder()
            .ledger(Arc::new(ledger))
            .orchestrator(Arc::new(MockOrchestrator::new()))
            .ports(Arc::new(InMemoryPortAllocator::new(50000)))
            .gateway(Arc::new(MockGateway::new()))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(runtime.is_running());
        assert!(runtime.subscribers().is_empty());
        runtime.shutdown().await.unwrap();
    }
}

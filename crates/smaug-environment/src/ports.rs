// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Published port allocation.
//!
//! Every service gets one published port for its lifetime. Ports come from a
//! counter that starts at the configured base and only moves forward, so two
//! services never share a port, even after one of them is removed.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Redis key holding the next port counter.
pub const NEXT_PORT_KEY: &str = "next_port";

/// Redis key holding the port of one service.
pub fn port_key(service_id: &str) -> String {
    format!("ports.{}", service_id)
}

/// Errors from port allocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PortError {
    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The counter ran past the last valid port.
    #[error("Port range exhausted (counter at {0})")]
    Exhausted(i64),
}

/// Result type for port allocation.
pub type Result<T> = std::result::Result<T, PortError>;

/// Maps service identities to stable published ports.
#[async_trait]
pub trait PortAllocator: Send + Sync {
    /// Return the port of `service_id`, assigning a fresh one on first use.
    async fn allocate(&self, service_id: &str) -> Result<u16>;

    /// Forget the mapping of `service_id`. The port is not handed out again.
    async fn release(&self, service_id: &str) -> Result<()>;
}

fn to_port(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| PortError::Exhausted(value))
}

#[derive(Debug)]
struct InMemoryState {
    ports: HashMap<String, u16>,
    next: i64,
}

/// Process-local allocator.
pub struct InMemoryPortAllocator {
    state: Mutex<InMemoryState>,
}

impl InMemoryPortAllocator {
    /// Create an allocator whose first port is `base`.
    pub fn new(base: u16) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                ports: HashMap::new(),
                next: i64::from(base),
            }),
        }
    }
}

#[async_trait]
impl PortAllocator for InMemoryPortAllocator {
    async fn allocate(&self, service_id: &str) -> Result<u16> {
        let mut state = self.state.lock().await;
        if let Some(port) = state.ports.get(service_id) {
            return Ok(*port);
        }

        let port = to_port(state.next)?;
        state.next += 1;
        state.ports.insert(service_id.to_string(), port);
        debug!(service_id = %service_id, port, "Allocated port");

        Ok(port)
    }

    async fn release(&self, service_id: &str) -> Result<()> {
        self.state.lock().await.ports.remove(service_id);
        Ok(())
    }
}

/// Redis-backed allocator shared by every control-plane process.
///
/// Uses `ports.<service>` keys and an `INCR` counter under `next_port`.
/// Concurrent first allocations for the same service race on `SET NX`; the
/// loser reads back the winner's port.
#[derive(Clone)]
pub struct RedisPortAllocator {
    conn: ConnectionManager,
    base: u16,
}

impl RedisPortAllocator {
    /// Connect to Redis at `redis_url`.
    pub async fn connect(redis_url: &str, base: u16) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, base })
    }
}

#[async_trait]
impl PortAllocator for RedisPortAllocator {
    async fn allocate(&self, service_id: &str) -> Result<u16> {
        let mut conn = self.conn.clone();
        let key = port_key(service_id);

        if let Some(port) = conn.get::<_, Option<i64>>(&key).await? {
            return to_port(port);
        }

        // Seed so the first INCR yields the base port.
        let _: bool = conn.set_nx(NEXT_PORT_KEY, i64::from(self.base) - 1).await?;
        let candidate: i64 = conn.incr(NEXT_PORT_KEY, 1).await?;
        let port = to_port(candidate)?;

        let claimed: bool = conn.set_nx(&key, candidate).await?;
        if claimed {
            debug!(service_id = %service_id, port, "Allocated port");
            return Ok(port);
        }

        let existing: i64 = conn.get(&key).await?;
        to_port(existing)
    }

    async fn release(&self, service_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(port_key(service_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_port_is_base() {
        let allocator = InMemoryPortAllocator::new(50000);
        assert_eq!(allocator.allocate("whelp-a").await.unwrap(), 50000);
        assert_eq!(allocator.allocate("whelp-b").await.unwrap(), 50001);
    }

    #[tokio::test]
    async fn test_allocation_is_stable() {
        let allocator = InMemoryPortAllocator::new(50000);
        let first = allocator.allocate("whelp-a").await.unwrap();
        allocator.allocate("whelp-b").await.unwrap();
        assert_eq!(allocator.allocate("whelp-a").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_released_ports_are_not_reused() {
        let allocator = InMemoryPortAllocator::new(50000);
        let a = allocator.allocate("whelp-a").await.unwrap();
        allocator.release("whelp-a").await.unwrap();

        let b = allocator.allocate("whelp-b").await.unwrap();
        assert_ne!(a, b);

        // Re-allocating a released service gets a fresh port
        let a_again = allocator.allocate("whelp-a").await.unwrap();
        assert_ne!(a_again, a);
        assert_ne!(a_again, b);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let allocator = Arc::new(InMemoryPortAllocator::new(50000));
        let mut handles = Vec::new();
        for i in 0..50 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.allocate(&format!("whelp-{}", i)).await.unwrap()
            }));
        }

        let mut ports = HashSet::new();
        for handle in handles {
            ports.insert(handle.await.unwrap());
        }
        assert_eq!(ports.len(), 50);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let allocator = InMemoryPortAllocator::new(u16::MAX);
        assert_eq!(allocator.allocate("last").await.unwrap(), u16::MAX);
        assert!(matches!(
            allocator.allocate("overflow").await,
            Err(PortError::Exhausted(_))
        ));
    }
}

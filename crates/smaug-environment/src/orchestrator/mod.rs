// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestrator module - workload backends.

pub mod mock;
pub mod swarm;
mod traits;

pub use mock::MockOrchestrator;
pub use swarm::SwarmOrchestrator;
pub use traits::*;

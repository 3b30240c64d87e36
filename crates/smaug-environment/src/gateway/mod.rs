// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateway module - payment backends.

pub mod mock;
pub mod stripe;
mod traits;

pub use mock::{MockFailure, MockGateway};
pub use stripe::StripeGateway;
pub use traits::*;

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod registry;
pub mod token_pool;

pub use event_bus::{EventBus, EventBusError, EventReceiver, GovernanceEvent, TaskEventReceiver};
pub use registry::{RegistryLimits, TaskRegistry};
pub use token_pool::ResourceTokenPool;

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Lifecycle, resource-token and context-switch governance for hierarchical
//! concurrent tasks running on tokio.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` holds pure types, `infrastructure` the registry,
//!   token pool and event bus, `application` the engine, heartbeat and
//!   watchdog

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{
    DestructionReport, GovernanceEngine, GovernanceReport, LivenessWatchdog, SweepOutcome,
    TaskContext, TaskHandle, TransferCount,
};
pub use domain::config::{GovernanceConfig, WatchdogConfig};
pub use domain::error::GovernanceError;
pub use domain::events::{ContextSwitchEvent, TaskLifecycleEvent, TokenEvent};
pub use domain::hierarchy::{HierarchyPosition, HierarchyRelation, HierarchyValidator};
pub use domain::task::{
    ConcurrencyMode, DestroyPolicy, HeartbeatVerdict, StopReason, TaskId, TaskPolicy, TaskSnapshot,
};
pub use domain::token::{AccessMask, ResourceToken, TokenId, TokenState};
pub use infrastructure::{EventBusError, EventReceiver, GovernanceEvent, TaskEventReceiver};

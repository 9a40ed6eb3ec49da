// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod engine;
pub mod heartbeat;
pub mod watchdog;

pub use engine::{DestructionReport, GovernanceEngine, GovernanceReport, TransferCount};
pub use heartbeat::{worker_loop, TaskContext, TaskHandle};
pub use watchdog::{LivenessWatchdog, SweepOutcome};

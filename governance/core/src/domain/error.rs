// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Governance Error Taxonomy
//!
//! Every engine operation returns `Result<_, GovernanceError>`. Ordinary
//! governance failures are caller-recoverable; none of them abort the process.
//!
//! | Variant | Raised by | Recovery |
//! |---------|-----------|----------|
//! | `DuplicateTaskId` | spawn | pick another id |
//! | `UnknownTask` | lookups, spawn (parent), context switch | refresh view |
//! | `PoolExhausted` | spawn | terminate tasks or raise capacity |
//! | `TokenPoolExhausted` | acquire | backoff and retry |
//! | `InvalidToken` | release, mark_transferable | drop the stale id |
//! | `PermissionDenied` | context switch | nothing was applied |
//! | `SelfTermination` | terminate, destroy | stop by returning from the body |
//!
//! Already-terminated and already-orphaned targets are not errors.

use crate::domain::task::TaskId;
use crate::domain::token::TokenId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceError {
    #[error("task {0} is already registered")]
    DuplicateTaskId(TaskId),

    #[error("task {0} is not registered")]
    UnknownTask(TaskId),

    #[error("task registry is full ({capacity} tasks)")]
    PoolExhausted { capacity: usize },

    #[error("resource token pool is exhausted ({capacity} tokens)")]
    TokenPoolExhausted { capacity: usize },

    #[error("invalid resource token {0}")]
    InvalidToken(TokenId),

    #[error("context switch {from} -> {to} denied: tasks are not in the same governance hierarchy")]
    PermissionDenied { from: TaskId, to: TaskId },

    #[error("parent task {parent} has reached its child limit ({limit})")]
    ChildLimitExceeded { parent: TaskId, limit: usize },

    #[error("task {task} would sit at generation depth {depth}, above the limit of {limit}")]
    HierarchyDepthExceeded { task: TaskId, depth: u32, limit: u32 },

    #[error("no tokio runtime is available to host task executions")]
    RuntimeUnavailable,

    #[error("execution of task {task} failed: {reason}")]
    ExecutionFailed { task: TaskId, reason: String },

    /// A task body tried to join its own execution.
    #[error("task {0} cannot terminate itself from inside its own execution")]
    SelfTermination(TaskId),

    /// A registry record lost its execution handle without a termination in
    /// flight. This is a programming error, never a caller mistake.
    #[error("registry record for task {0} has no execution handle")]
    InconsistentRegistry(TaskId),

    #[error("invalid governance configuration: {0}")]
    Config(String),
}

impl GovernanceError {
    /// Capacity errors clear up on their own once other tasks or tokens are
    /// released, so callers may retry them with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernanceError::PoolExhausted { .. } | GovernanceError::TokenPoolExhausted { .. }
        )
    }
}

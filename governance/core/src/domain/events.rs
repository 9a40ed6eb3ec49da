// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::hierarchy::HierarchyRelation;
use crate::domain::task::{DestroyPolicy, StopReason, TaskId};
use crate::domain::token::{AccessMask, TokenId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskLifecycleEvent {
    TaskSpawned {
        task_id: TaskId,
        parent_id: Option<TaskId>,
        destroy_policy: DestroyPolicy,
        generation_depth: u32,
        spawned_at: DateTime<Utc>,
    },
    ParentDestructionRequested {
        parent_id: TaskId,
        child_count: usize,
        requested_at: DateTime<Utc>,
    },
    ChildCascaded {
        task_id: TaskId,
        parent_id: TaskId,
        cascaded_at: DateTime<Utc>,
    },
    ChildOrphaned {
        task_id: TaskId,
        former_parent_id: TaskId,
        orphaned_at: DateTime<Utc>,
    },
    GracefulShutdownRequested {
        task_id: TaskId,
        parent_id: TaskId,
        requested_at: DateTime<Utc>,
    },
    ChildAborted {
        task_id: TaskId,
        parent_id: TaskId,
        aborted_at: DateTime<Utc>,
    },
    TaskTerminated {
        task_id: TaskId,
        terminated_at: DateTime<Utc>,
    },
    TaskExited {
        task_id: TaskId,
        reason: StopReason,
        heartbeats: u64,
        exited_at: DateTime<Utc>,
    },
    TaskFlaggedStale {
        task_id: TaskId,
        since_last_heartbeat_ms: u64,
        flagged_at: DateTime<Utc>,
    },
}

impl TaskLifecycleEvent {
    pub fn involves(&self, task: TaskId) -> bool {
        match self {
            TaskLifecycleEvent::TaskSpawned { task_id, parent_id, .. } => {
                *task_id == task || *parent_id == Some(task)
            }
            TaskLifecycleEvent::ParentDestructionRequested { parent_id, .. } => *parent_id == task,
            TaskLifecycleEvent::ChildCascaded { task_id, parent_id, .. }
            | TaskLifecycleEvent::GracefulShutdownRequested { task_id, parent_id, .. }
            | TaskLifecycleEvent::ChildAborted { task_id, parent_id, .. } => {
                *task_id == task || *parent_id == task
            }
            TaskLifecycleEvent::ChildOrphaned { task_id, former_parent_id, .. } => {
                *task_id == task || *former_parent_id == task
            }
            TaskLifecycleEvent::TaskTerminated { task_id, .. }
            | TaskLifecycleEvent::TaskExited { task_id, .. }
            | TaskLifecycleEvent::TaskFlaggedStale { task_id, .. } => *task_id == task,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenEvent {
    TokenAcquired {
        token_id: TokenId,
        task_id: TaskId,
        resource_name: String,
        access_mask: AccessMask,
        acquired_at: DateTime<Utc>,
    },
    TokenAcquisitionFailed {
        task_id: TaskId,
        resource_name: String,
        failed_at: DateTime<Utc>,
    },
    TokenReleased {
        token_id: TokenId,
        previous_owner: Option<TaskId>,
        released_at: DateTime<Utc>,
    },
    TransferabilityChanged {
        token_id: TokenId,
        transferable: bool,
        changed_at: DateTime<Utc>,
    },
    TokensReclaimed {
        token_ids: Vec<TokenId>,
        reclaimed_at: DateTime<Utc>,
    },
}

impl TokenEvent {
    pub fn involves(&self, task: TaskId) -> bool {
        match self {
            TokenEvent::TokenAcquired { task_id, .. }
            | TokenEvent::TokenAcquisitionFailed { task_id, .. } => *task_id == task,
            TokenEvent::TokenReleased { previous_owner, .. } => *previous_owner == Some(task),
            TokenEvent::TransferabilityChanged { .. } | TokenEvent::TokensReclaimed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextSwitchEvent {
    ContextSwitched {
        from: TaskId,
        to: TaskId,
        relation: HierarchyRelation,
        transferred: Vec<TokenId>,
        switched_at: DateTime<Utc>,
    },
    ContextSwitchDenied {
        from: TaskId,
        to: TaskId,
        denied_at: DateTime<Utc>,
    },
}

impl ContextSwitchEvent {
    pub fn involves(&self, task: TaskId) -> bool {
        match self {
            ContextSwitchEvent::ContextSwitched { from, to, .. }
            | ContextSwitchEvent::ContextSwitchDenied { from, to, .. } => *from == task || *to == task,
        }
    }
}

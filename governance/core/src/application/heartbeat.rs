// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Heartbeat
//!
//! The cooperative side of governance. Every task body receives a
//! [`TaskContext`] and is expected to call [`TaskContext::heartbeat`] or
//! [`TaskContext::tick`] at least once per heartbeat interval, returning as
//! soon as the verdict says stop.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Task-facing handle over the shared control block

use crate::domain::task::{HeartbeatVerdict, StopReason, TaskControl, TaskId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Handed to a task body at spawn.
#[derive(Debug, Clone)]
pub struct TaskContext {
    control: Arc<TaskControl>,
    heartbeat_interval: Duration,
}

impl TaskContext {
    pub(crate) fn new(control: Arc<TaskControl>, heartbeat_interval: Duration) -> Self {
        Self {
            control,
            heartbeat_interval,
        }
    }

    pub(crate) fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    pub fn task_id(&self) -> TaskId {
        self.control.task_id()
    }

    pub fn generation_depth(&self) -> u32 {
        self.control.generation_depth()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Cheap flag peek for long inner loops; does not count as a heartbeat.
    pub fn should_stop(&self) -> bool {
        self.control.termination_requested()
    }

    /// Evaluate one heartbeat and yield to the runtime when the cadence asks
    /// for it.
    pub async fn heartbeat(&self) -> HeartbeatVerdict {
        let verdict = self.control.check();
        match verdict {
            HeartbeatVerdict::Continue { tick, yield_now: true } => {
                trace!(task_id = %self.task_id(), tick, "Yielding back to the scheduler");
                tokio::task::yield_now().await;
            }
            HeartbeatVerdict::Stop(reason) => {
                debug!(task_id = %self.task_id(), reason = %reason, "Heartbeat requested stop");
            }
            HeartbeatVerdict::Continue { .. } => {}
        }
        verdict
    }

    /// Sleep one heartbeat interval, then heartbeat.
    pub async fn tick(&self) -> HeartbeatVerdict {
        tokio::time::sleep(self.heartbeat_interval).await;
        self.heartbeat().await
    }
}

/// Body used by `spawn_worker`: heartbeat until told to stop.
pub async fn worker_loop(ctx: TaskContext) {
    loop {
        if let HeartbeatVerdict::Stop(_) = ctx.tick().await {
            return;
        }
    }
}

/// Caller-side view of a spawned task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: TaskId,
    control: Arc<TaskControl>,
}

impl TaskHandle {
    pub(crate) fn new(control: Arc<TaskControl>) -> Self {
        Self {
            task_id: control.task_id(),
            control,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task_id
    }

    pub fn generation_depth(&self) -> u32 {
        self.control.generation_depth()
    }

    pub fn termination_requested(&self) -> bool {
        self.control.termination_requested()
    }

    pub fn has_exited(&self) -> bool {
        self.control.has_exited()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.control.stop_reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{DestroyPolicy, ExecutionDefaults, TaskPolicy};

    fn context(policy: TaskPolicy) -> TaskContext {
        let defaults = ExecutionDefaults {
            max_execution_time: None,
            yield_every_ticks: 10,
        };
        TaskContext::new(
            Arc::new(TaskControl::new(&policy, 0, defaults)),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_worker_loop_exits_on_termination() {
        let ctx = context(TaskPolicy::root(TaskId(1), DestroyPolicy::Graceful));
        let handle = TaskHandle::new(ctx.control.clone());
        let worker = tokio::spawn(worker_loop(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ctx.should_stop());
        ctx.control.request_termination();

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert_eq!(handle.stop_reason(), Some(StopReason::TerminationRequested));
        assert!(handle.termination_requested());
    }

    #[tokio::test]
    async fn test_tick_counts_heartbeats() {
        let ctx = context(TaskPolicy::root(TaskId(2), DestroyPolicy::Cascade));
        for _ in 0..3 {
            assert!(!ctx.tick().await.is_stop());
        }
        assert_eq!(ctx.control.heartbeat_count(), 3);
    }
}

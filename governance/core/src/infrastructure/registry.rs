// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Registry
//!
//! Owns every live task record, keyed by [`TaskId`]. Thread-safe with a
//! `parking_lot::RwLock`; no guard ever crosses an `.await`, so the engine can
//! join executions without holding the lock.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Record storage, spawn-time hierarchy limits, and the
//!   termination hand-off between `terminate` and a task's own exit path

use crate::domain::error::GovernanceError;
use crate::domain::hierarchy::HierarchyPosition;
use crate::domain::task::{
    truncate_on_char_boundary, DestroyPolicy, StopReason, TaskControl, TaskId, TaskPolicy,
    TaskSnapshot, MAX_SPAWN_LOCATION_LEN,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub capacity: usize,
    pub max_children_per_parent: usize,
    pub max_hierarchy_depth: u32,
}

struct TaskRecord {
    parent_id: Option<TaskId>,
    destroy_policy: DestroyPolicy,
    keep_alive: bool,
    daemon_mode: bool,
    spawn_location: String,
    created_at: DateTime<Utc>,
    control: Arc<TaskControl>,
    handle: Option<JoinHandle<()>>,
    terminating: bool,
}

impl TaskRecord {
    fn position(&self) -> HierarchyPosition {
        HierarchyPosition {
            task_id: self.control.task_id(),
            parent_id: self.parent_id,
        }
    }

    fn snapshot(&self, child_count: usize) -> TaskSnapshot {
        let control = &self.control;
        TaskSnapshot {
            task_id: control.task_id(),
            parent_id: self.parent_id,
            destroy_policy: self.destroy_policy,
            keep_alive: self.keep_alive,
            daemon_mode: self.daemon_mode,
            concurrency_mode: control.concurrency_mode(),
            trace_capped: control.trace_capped(),
            max_trace_depth: control.max_trace_depth(),
            generation_depth: control.generation_depth(),
            max_execution_time: control.max_execution_time(),
            return_to_main_required: control.return_to_main_required(),
            created_at: self.created_at,
            uptime: control.uptime(),
            since_last_heartbeat: control.since_last_heartbeat(),
            heartbeat_count: control.heartbeat_count(),
            context_switch_count: control.context_switch_count(),
            termination_requested: control.termination_requested(),
            terminating: self.terminating,
            child_count,
            spawn_location: self.spawn_location.clone(),
        }
    }
}

/// A child found by a parent-destruction scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEntry {
    pub task_id: TaskId,
    pub destroy_policy: DestroyPolicy,
    pub keep_alive: bool,
}

/// Both sides of a context switch, read under one guard.
pub struct SwitchParties {
    pub from: (HierarchyPosition, Arc<TaskControl>),
    pub to: (HierarchyPosition, Arc<TaskControl>),
}

pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    limits: RegistryLimits,
}

impl TaskRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.read().contains_key(&task_id)
    }

    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Run `f` with a membership predicate while the read guard is held, so
    /// no task registers or deregisters until `f` returns.
    ///
    /// `f` may take the token pool lock; the pool never calls back into the
    /// registry, so the registry-then-pool order cannot invert.
    pub fn with_live_view<R>(&self, f: impl FnOnce(&dyn Fn(TaskId) -> bool) -> R) -> R {
        let tasks = self.tasks.read();
        f(&|task_id| tasks.contains_key(&task_id))
    }

    /// Validate and insert a new record.
    ///
    /// `start` receives the computed generation depth and must return the
    /// control block plus the handle of the already-started execution. It
    /// runs under the write lock, so the execution cannot deregister itself
    /// before its record exists.
    pub fn register(
        &self,
        policy: &TaskPolicy,
        start: impl FnOnce(u32) -> (Arc<TaskControl>, JoinHandle<()>),
    ) -> Result<Arc<TaskControl>, GovernanceError> {
        let mut tasks = self.tasks.write();

        if tasks.contains_key(&policy.task_id) {
            return Err(GovernanceError::DuplicateTaskId(policy.task_id));
        }
        if tasks.len() >= self.limits.capacity {
            return Err(GovernanceError::PoolExhausted {
                capacity: self.limits.capacity,
            });
        }

        let generation_depth = match policy.parent_id {
            None => 0,
            Some(parent) => {
                let parent_record = tasks
                    .get(&parent)
                    .ok_or(GovernanceError::UnknownTask(parent))?;
                let siblings = tasks
                    .values()
                    .filter(|record| record.parent_id == Some(parent))
                    .count();
                if siblings >= self.limits.max_children_per_parent {
                    return Err(GovernanceError::ChildLimitExceeded {
                        parent,
                        limit: self.limits.max_children_per_parent,
                    });
                }
                parent_record.control.generation_depth() + 1
            }
        };

        if generation_depth > self.limits.max_hierarchy_depth {
            return Err(GovernanceError::HierarchyDepthExceeded {
                task: policy.task_id,
                depth: generation_depth,
                limit: self.limits.max_hierarchy_depth,
            });
        }

        let (control, handle) = start(generation_depth);
        tasks.insert(
            policy.task_id,
            TaskRecord {
                parent_id: policy.parent_id,
                destroy_policy: policy.destroy_policy,
                keep_alive: policy.keep_alive,
                daemon_mode: false,
                spawn_location: truncate_on_char_boundary(&policy.spawn_location, MAX_SPAWN_LOCATION_LEN),
                created_at: Utc::now(),
                control: control.clone(),
                handle: Some(handle),
                terminating: false,
            },
        );
        debug!(task_id = %policy.task_id, generation_depth, "Task registered");
        Ok(control)
    }

    /// Direct children of `parent_id` that are not already being torn down.
    pub fn children_of(&self, parent_id: TaskId) -> Vec<ChildEntry> {
        let tasks = self.tasks.read();
        let mut children: Vec<ChildEntry> = tasks
            .iter()
            .filter(|(_, record)| record.parent_id == Some(parent_id) && !record.terminating)
            .map(|(task_id, record)| ChildEntry {
                task_id: *task_id,
                destroy_policy: record.destroy_policy,
                keep_alive: record.keep_alive,
            })
            .collect();
        children.sort_by_key(|child| child.task_id);
        children
    }

    /// Clear the parent link and enter daemon mode, once.
    ///
    /// Only applies while the record still points at `expected_parent`, which
    /// keeps repeated destruction scans idempotent.
    pub fn orphan(&self, task_id: TaskId, expected_parent: TaskId) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(&task_id) {
            Some(record) if record.parent_id == Some(expected_parent) && !record.terminating => {
                record.parent_id = None;
                record.daemon_mode = true;
                true
            }
            _ => false,
        }
    }

    /// Raise the termination flag without waiting. `false` if the task is
    /// unknown or was already asked to stop.
    pub fn request_termination(&self, task_id: TaskId) -> bool {
        self.tasks
            .read()
            .get(&task_id)
            .map(|record| record.control.request_termination())
            .unwrap_or(false)
    }

    /// Claim the execution handle for a join.
    ///
    /// Returns `Ok(None)` when the task is unknown or another caller already
    /// holds the handle, which makes repeated terminations harmless. A call
    /// made from inside the task's own execution is refused and leaves the
    /// record untouched.
    pub fn begin_termination(
        &self,
        task_id: TaskId,
    ) -> Result<Option<(Arc<TaskControl>, JoinHandle<()>)>, GovernanceError> {
        let mut tasks = self.tasks.write();
        let Some(record) = tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if record.terminating {
            return Ok(None);
        }

        let caller = tokio::task::try_id();
        if caller.is_some() && record.handle.as_ref().map(JoinHandle::id) == caller {
            return Err(GovernanceError::SelfTermination(task_id));
        }

        let Some(handle) = record.handle.take() else {
            error!(task_id = %task_id, "Registry record has no execution handle");
            return Err(GovernanceError::InconsistentRegistry(task_id));
        };
        record.terminating = true;
        record.control.request_termination();
        Ok(Some((record.control.clone(), handle)))
    }

    /// Remove a record after its execution returned on its own.
    ///
    /// Records with a termination in flight are left to the reaper that
    /// `terminate` started, which removes them once the join completes.
    pub fn remove_exited(&self, task_id: TaskId, control: &Arc<TaskControl>) -> bool {
        self.remove_if(task_id, |record| {
            Arc::ptr_eq(&record.control, control) && !record.terminating
        })
    }

    /// Remove a record after `terminate` joined it.
    pub fn remove_terminated(&self, task_id: TaskId, control: &Arc<TaskControl>) -> bool {
        self.remove_if(task_id, |record| Arc::ptr_eq(&record.control, control))
    }

    fn remove_if(&self, task_id: TaskId, predicate: impl Fn(&TaskRecord) -> bool) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get(&task_id) {
            Some(record) if predicate(record) => {
                tasks.remove(&task_id);
                true
            }
            _ => false,
        }
    }

    /// Hard-stop and drop a record without joining.
    pub fn abort(&self, task_id: TaskId) -> Option<Arc<TaskControl>> {
        let mut tasks = self.tasks.write();
        if tasks.get(&task_id).map_or(true, |record| record.terminating) {
            return None;
        }
        let mut record = tasks.remove(&task_id)?;
        drop(tasks);

        record.control.request_termination();
        if let Some(handle) = record.handle.take() {
            handle.abort();
        }
        record.control.mark_exited(StopReason::Aborted);
        Some(record.control)
    }

    pub fn control(&self, task_id: TaskId) -> Option<Arc<TaskControl>> {
        self.tasks.read().get(&task_id).map(|record| record.control.clone())
    }

    /// Positions and control blocks of both tasks from one consistent view.
    pub fn switch_parties(&self, from: TaskId, to: TaskId) -> Result<SwitchParties, GovernanceError> {
        let tasks = self.tasks.read();
        let from_record = tasks.get(&from).ok_or(GovernanceError::UnknownTask(from))?;
        let to_record = tasks.get(&to).ok_or(GovernanceError::UnknownTask(to))?;
        Ok(SwitchParties {
            from: (from_record.position(), from_record.control.clone()),
            to: (to_record.position(), to_record.control.clone()),
        })
    }

    pub fn snapshot(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        let tasks = self.tasks.read();
        let record = tasks.get(&task_id)?;
        Some(record.snapshot(Self::count_children(&tasks, task_id)))
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read();
        let mut snapshots: Vec<TaskSnapshot> = tasks
            .iter()
            .map(|(task_id, record)| record.snapshot(Self::count_children(&tasks, *task_id)))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.task_id);
        snapshots
    }

    fn count_children(tasks: &HashMap<TaskId, TaskRecord>, parent: TaskId) -> usize {
        tasks
            .values()
            .filter(|record| record.parent_id == Some(parent))
            .count()
    }

    /// Running tasks whose last heartbeat is older than `threshold` and that
    /// have not been asked to stop yet.
    pub fn stale(&self, threshold: Duration) -> Vec<(TaskId, Duration)> {
        let tasks = self.tasks.read();
        let mut stale: Vec<(TaskId, Duration)> = tasks
            .iter()
            .filter(|(_, record)| !record.terminating && !record.control.termination_requested())
            .filter_map(|(task_id, record)| {
                let age = record.control.since_last_heartbeat();
                (age > threshold).then_some((*task_id, age))
            })
            .collect();
        stale.sort_by_key(|(task_id, _)| *task_id);
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::ExecutionDefaults;

    fn limits() -> RegistryLimits {
        RegistryLimits {
            capacity: 4,
            max_children_per_parent: 2,
            max_hierarchy_depth: 2,
        }
    }

    fn defaults() -> ExecutionDefaults {
        ExecutionDefaults {
            max_execution_time: None,
            yield_every_ticks: 10,
        }
    }

    fn register(registry: &TaskRegistry, policy: TaskPolicy) -> Result<Arc<TaskControl>, GovernanceError> {
        let starter = policy.clone();
        registry.register(&policy, move |depth| {
            let control = Arc::new(TaskControl::new(&starter, depth, defaults()));
            (control, tokio::spawn(async {}))
        })
    }

    #[tokio::test]
    async fn test_register_computes_generation_depth() {
        let registry = TaskRegistry::new(limits());
        let root = register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();
        let child = register(&registry, TaskPolicy::child(TaskId(2), TaskId(1), DestroyPolicy::Cascade)).unwrap();

        assert_eq!(root.generation_depth(), 0);
        assert_eq!(child.generation_depth(), 1);
        assert_eq!(registry.snapshot(TaskId(1)).unwrap().child_count, 1);
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let registry = TaskRegistry::new(limits());
        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();

        assert_eq!(
            register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap_err(),
            GovernanceError::DuplicateTaskId(TaskId(1))
        );
        assert_eq!(
            register(&registry, TaskPolicy::child(TaskId(5), TaskId(99), DestroyPolicy::Cascade)).unwrap_err(),
            GovernanceError::UnknownTask(TaskId(99))
        );

        register(&registry, TaskPolicy::child(TaskId(2), TaskId(1), DestroyPolicy::Cascade)).unwrap();
        register(&registry, TaskPolicy::child(TaskId(3), TaskId(1), DestroyPolicy::Cascade)).unwrap();
        assert_eq!(
            register(&registry, TaskPolicy::child(TaskId(4), TaskId(1), DestroyPolicy::Cascade)).unwrap_err(),
            GovernanceError::ChildLimitExceeded { parent: TaskId(1), limit: 2 }
        );

        register(&registry, TaskPolicy::child(TaskId(4), TaskId(2), DestroyPolicy::Cascade)).unwrap();
        assert_eq!(
            register(&registry, TaskPolicy::root(TaskId(6), DestroyPolicy::Cascade)).unwrap_err(),
            GovernanceError::PoolExhausted { capacity: 4 }
        );
    }

    #[tokio::test]
    async fn test_hierarchy_depth_limit() {
        let registry = TaskRegistry::new(RegistryLimits { capacity: 10, ..limits() });
        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();
        register(&registry, TaskPolicy::child(TaskId(2), TaskId(1), DestroyPolicy::Cascade)).unwrap();
        register(&registry, TaskPolicy::child(TaskId(3), TaskId(2), DestroyPolicy::Cascade)).unwrap();

        assert_eq!(
            register(&registry, TaskPolicy::child(TaskId(4), TaskId(3), DestroyPolicy::Cascade)).unwrap_err(),
            GovernanceError::HierarchyDepthExceeded { task: TaskId(4), depth: 3, limit: 2 }
        );
    }

    #[tokio::test]
    async fn test_orphan_happens_once() {
        let registry = TaskRegistry::new(limits());
        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();
        register(&registry, TaskPolicy::child(TaskId(2), TaskId(1), DestroyPolicy::KeepAlive)).unwrap();

        assert!(registry.orphan(TaskId(2), TaskId(1)));
        assert!(!registry.orphan(TaskId(2), TaskId(1)));

        let snapshot = registry.snapshot(TaskId(2)).unwrap();
        assert_eq!(snapshot.parent_id, None);
        assert!(snapshot.daemon_mode);
        assert!(registry.children_of(TaskId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_begin_termination_hands_out_handle_once() {
        let registry = TaskRegistry::new(limits());
        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();

        let (control, handle) = registry.begin_termination(TaskId(1)).unwrap().unwrap();
        assert!(control.termination_requested());
        assert!(registry.begin_termination(TaskId(1)).unwrap().is_none());
        assert!(registry.snapshot(TaskId(1)).unwrap().terminating);

        // the execution's own exit path must leave the record to terminate
        assert!(!registry.remove_exited(TaskId(1), &control));
        handle.await.unwrap();
        assert!(registry.remove_terminated(TaskId(1), &control));
        assert!(registry.begin_termination(TaskId(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_ignores_reused_id() {
        let registry = TaskRegistry::new(limits());
        let old = register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();
        assert!(registry.remove_exited(TaskId(1), &old));

        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();
        assert!(!registry.remove_exited(TaskId(1), &old));
        assert!(registry.contains(TaskId(1)));
    }

    #[tokio::test]
    async fn test_abort_removes_record() {
        let registry = TaskRegistry::new(limits());
        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Immediate)).unwrap();

        let control = registry.abort(TaskId(1)).unwrap();
        assert_eq!(control.stop_reason(), Some(StopReason::Aborted));
        assert!(!registry.contains(TaskId(1)));
        assert!(registry.abort(TaskId(1)).is_none());
    }

    #[tokio::test]
    async fn test_switch_parties_unknown_task() {
        let registry = TaskRegistry::new(limits());
        register(&registry, TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();

        assert!(matches!(
            registry.switch_parties(TaskId(1), TaskId(8)),
            Err(GovernanceError::UnknownTask(TaskId(8)))
        ));
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Governance Engine
//!
//! Single entry point composing the task registry, the resource token pool,
//! the hierarchy validator and the event bus. Every operation is a method on
//! an explicit engine value; there is no global state, and several engines
//! may coexist in one process.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Spawn, parent destruction, termination, token arbitration
//!   and hierarchy-validated context switches
//!
//! # Locking
//!
//! Registry guards and the token pool mutex are only held inside synchronous
//! helper calls. Every `.await` in this module happens with no guard alive.
//! When both are held, the registry guard is taken first.

use crate::application::heartbeat::{worker_loop, TaskContext, TaskHandle};
use crate::domain::config::GovernanceConfig;
use crate::domain::error::GovernanceError;
use crate::domain::events::{ContextSwitchEvent, TaskLifecycleEvent, TokenEvent};
use crate::domain::hierarchy::HierarchyValidator;
use crate::domain::task::{
    DestroyPolicy, ExecutionDefaults, StopReason, TaskControl, TaskId, TaskPolicy, TaskSnapshot,
    truncate_on_char_boundary,
};
use crate::domain::token::{AccessMask, ResourceToken, TokenId, MAX_RESOURCE_NAME_LEN};
use crate::infrastructure::event_bus::{EventBus, EventReceiver, TaskEventReceiver};
use crate::infrastructure::registry::{RegistryLimits, TaskRegistry};
use crate::infrastructure::token_pool::ResourceTokenPool;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Number of tokens moved by one context switch.
pub type TransferCount = usize;

/// What one `request_parent_destruction` call did, including what it did to
/// descendants reached through Cascade and Immediate children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestructionReport {
    pub parent_id: TaskId,
    pub cascaded: Vec<TaskId>,
    pub orphaned: Vec<TaskId>,
    pub signalled: Vec<TaskId>,
    pub aborted: Vec<TaskId>,
    /// Children whose termination reported an error. They are still removed.
    pub failed: Vec<(TaskId, GovernanceError)>,
}

impl DestructionReport {
    fn new(parent_id: TaskId) -> Self {
        Self {
            parent_id,
            cascaded: Vec::new(),
            orphaned: Vec::new(),
            signalled: Vec::new(),
            aborted: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cascaded.is_empty()
            && self.orphaned.is_empty()
            && self.signalled.is_empty()
            && self.aborted.is_empty()
            && self.failed.is_empty()
    }
}

/// Point-in-time telemetry over the whole engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceReport {
    pub generated_at: DateTime<Utc>,
    pub registry_capacity: usize,
    pub live_tasks: usize,
    pub daemon_tasks: usize,
    pub token_capacity: usize,
    pub tokens_in_use: usize,
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Clone)]
pub struct GovernanceEngine {
    config: Arc<GovernanceConfig>,
    registry: Arc<TaskRegistry>,
    tokens: Arc<ResourceTokenPool>,
    events: EventBus,
}

impl GovernanceEngine {
    pub fn new(config: GovernanceConfig) -> Result<Self, GovernanceError> {
        config
            .validate()
            .map_err(|e| GovernanceError::Config(e.to_string()))?;

        let registry = TaskRegistry::new(RegistryLimits {
            capacity: config.registry_capacity,
            max_children_per_parent: config.max_children_per_parent,
            max_hierarchy_depth: config.max_hierarchy_depth,
        });
        let tokens = ResourceTokenPool::new(config.token_capacity);
        let events = EventBus::new(config.event_bus_capacity);

        info!(
            registry_capacity = config.registry_capacity,
            token_capacity = config.token_capacity,
            heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
            "Governance engine initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            tokens: Arc::new(tokens),
            events,
        })
    }

    pub fn with_defaults() -> Result<Self, GovernanceError> {
        Self::new(GovernanceConfig::default())
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register a task and start `body` on the current tokio runtime.
    ///
    /// The body must honor the heartbeat contract through the [`TaskContext`]
    /// it receives. Its record is removed when it returns on its own.
    pub fn spawn<F, Fut>(&self, policy: TaskPolicy, body: F) -> Result<TaskHandle, GovernanceError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| GovernanceError::RuntimeUnavailable)?;
        let defaults = ExecutionDefaults {
            max_execution_time: self.config.default_max_execution_time,
            yield_every_ticks: self.config.yield_every_ticks,
        };
        let heartbeat_interval = self.config.heartbeat_interval;
        let registry = self.registry.clone();
        let events = self.events.clone();

        let control = self.registry.register(&policy, |generation_depth| {
            let control = Arc::new(TaskControl::new(&policy, generation_depth, defaults));
            // published before the body can run so TaskExited never precedes it
            events.publish_lifecycle_event(TaskLifecycleEvent::TaskSpawned {
                task_id: policy.task_id,
                parent_id: policy.parent_id,
                destroy_policy: policy.destroy_policy,
                generation_depth,
                spawned_at: Utc::now(),
            });
            let ctx = TaskContext::new(control.clone(), heartbeat_interval);
            let handle = runtime.spawn(run_task(ctx, body, registry, events.clone()));
            (control, handle)
        });

        let control = match control {
            Ok(control) => control,
            Err(e) => {
                warn!(task_id = %policy.task_id, error = %e, "Spawn rejected");
                return Err(e);
            }
        };

        info!(
            task_id = %policy.task_id,
            parent_id = ?policy.parent_id,
            destroy_policy = %policy.destroy_policy,
            concurrency_mode = %policy.concurrency_mode,
            generation_depth = control.generation_depth(),
            "Task spawned"
        );
        Ok(TaskHandle::new(control))
    }

    /// Spawn with the built-in body that ticks until told to stop.
    pub fn spawn_worker(&self, policy: TaskPolicy) -> Result<TaskHandle, GovernanceError> {
        self.spawn(policy, worker_loop)
    }

    /// Stop a task and wait for its execution to return, then drop its record.
    ///
    /// Unknown ids and tasks already being terminated are a no-op. A body
    /// that panicked is still removed, and reported as `ExecutionFailed`.
    ///
    /// The join and the removal run on a separate reaper task, so dropping
    /// this future early does not strand the record. A body that targets its
    /// own execution, directly or through `destroy`/`request_parent_destruction`
    /// on an ancestor, gets `SelfTermination` instead of waiting on itself.
    pub async fn terminate(&self, task_id: TaskId) -> Result<(), GovernanceError> {
        self.join_termination(task_id).await.map(|_| ())
    }

    /// `Ok(true)` when this call claimed the execution and joined it.
    async fn join_termination(&self, task_id: TaskId) -> Result<bool, GovernanceError> {
        let runtime = Handle::try_current().map_err(|_| GovernanceError::RuntimeUnavailable)?;
        let Some((control, handle)) = self.registry.begin_termination(task_id)? else {
            debug!(task_id = %task_id, "Terminate ignored: task not registered or already terminating");
            return Ok(false);
        };

        info!(task_id = %task_id, "Terminating task");
        let reaper = runtime.spawn(reap_task(
            task_id,
            control,
            handle,
            self.registry.clone(),
            self.events.clone(),
        ));
        match reaper.await {
            Ok(outcome) => outcome.map(|()| true),
            Err(e) => Err(GovernanceError::ExecutionFailed {
                task: task_id,
                reason: format!("reaper did not finish: {e}"),
            }),
        }
    }

    /// Apply each direct child's destroy policy on behalf of `parent_id`.
    ///
    /// The parent itself is left untouched. Failures of individual children
    /// are collected in the report rather than aborting the walk.
    pub async fn request_parent_destruction(
        &self,
        parent_id: TaskId,
    ) -> Result<DestructionReport, GovernanceError> {
        let mut report = DestructionReport::new(parent_id);
        self.destroy_children(parent_id, &mut report).await;

        info!(
            parent_id = %parent_id,
            cascaded = report.cascaded.len(),
            orphaned = report.orphaned.len(),
            signalled = report.signalled.len(),
            aborted = report.aborted.len(),
            failed = report.failed.len(),
            "Parent destruction applied"
        );
        Ok(report)
    }

    fn destroy_children<'a>(
        &'a self,
        parent_id: TaskId,
        report: &'a mut DestructionReport,
    ) -> BoxFuture<'a, ()> {
        async move {
            let children = self.registry.children_of(parent_id);
            if children.is_empty() {
                return;
            }
            self.events.publish_lifecycle_event(TaskLifecycleEvent::ParentDestructionRequested {
                parent_id,
                child_count: children.len(),
                requested_at: Utc::now(),
            });

            for child in children {
                let task_id = child.task_id;
                match child.destroy_policy {
                    DestroyPolicy::KeepAlive if child.keep_alive => {
                        if self.registry.orphan(task_id, parent_id) {
                            info!(task_id = %task_id, former_parent_id = %parent_id, "Child orphaned into daemon mode");
                            self.events.publish_lifecycle_event(TaskLifecycleEvent::ChildOrphaned {
                                task_id,
                                former_parent_id: parent_id,
                                orphaned_at: Utc::now(),
                            });
                            report.orphaned.push(task_id);
                        }
                    }
                    DestroyPolicy::Cascade | DestroyPolicy::KeepAlive => {
                        info!(task_id = %task_id, parent_id = %parent_id, "Cascading destruction to child");
                        match self.join_termination(task_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!(task_id = %task_id, "Child already gone or joined by another caller");
                                continue;
                            }
                            Err(e) => {
                                // only ExecutionFailed means the join happened
                                let joined = matches!(e, GovernanceError::ExecutionFailed { .. });
                                report.failed.push((task_id, e));
                                if !joined {
                                    continue;
                                }
                            }
                        }
                        self.events.publish_lifecycle_event(TaskLifecycleEvent::ChildCascaded {
                            task_id,
                            parent_id,
                            cascaded_at: Utc::now(),
                        });
                        report.cascaded.push(task_id);
                        self.destroy_children(task_id, report).await;
                    }
                    DestroyPolicy::Graceful => {
                        if self.registry.request_termination(task_id) {
                            info!(task_id = %task_id, parent_id = %parent_id, "Graceful shutdown requested");
                            self.events.publish_lifecycle_event(
                                TaskLifecycleEvent::GracefulShutdownRequested {
                                    task_id,
                                    parent_id,
                                    requested_at: Utc::now(),
                                },
                            );
                            report.signalled.push(task_id);
                        }
                    }
                    DestroyPolicy::Immediate => {
                        let Some(control) = self.registry.abort(task_id) else {
                            continue;
                        };
                        warn!(task_id = %task_id, parent_id = %parent_id, "Child aborted; held tokens may leak");
                        self.events.publish_lifecycle_event(TaskLifecycleEvent::ChildAborted {
                            task_id,
                            parent_id,
                            aborted_at: Utc::now(),
                        });
                        self.events.publish_lifecycle_event(TaskLifecycleEvent::TaskExited {
                            task_id,
                            reason: StopReason::Aborted,
                            heartbeats: control.heartbeat_count(),
                            exited_at: Utc::now(),
                        });
                        report.aborted.push(task_id);
                        self.destroy_children(task_id, report).await;
                    }
                }
            }
        }
        .boxed()
    }

    /// Terminate a task, then apply its children's destroy policies.
    pub async fn destroy(&self, task_id: TaskId) -> Result<DestructionReport, GovernanceError> {
        let terminated = self.terminate(task_id).await;
        if let Err(e @ GovernanceError::SelfTermination(_)) = terminated {
            return Err(e);
        }
        let report = self.request_parent_destruction(task_id).await?;
        terminated.map(|()| report)
    }

    /// Terminate every registered task. Errors are logged, not returned.
    pub async fn shutdown(&self) {
        let ids = self.registry.ids();
        info!(tasks = ids.len(), "Shutting down governance engine");
        for task_id in ids {
            if let Err(e) = self.terminate(task_id).await {
                warn!(task_id = %task_id, error = %e, "Task failed during shutdown");
            }
        }
    }

    // ------------------------------------------------------------------
    // Resource tokens
    // ------------------------------------------------------------------

    pub fn acquire_token(
        &self,
        task_id: TaskId,
        resource_name: &str,
        access_mask: AccessMask,
    ) -> Result<TokenId, GovernanceError> {
        if !self.registry.contains(task_id) {
            return Err(GovernanceError::UnknownTask(task_id));
        }

        match self.tokens.acquire(task_id, resource_name, access_mask) {
            Ok(token_id) => {
                self.events.publish_token_event(TokenEvent::TokenAcquired {
                    token_id,
                    task_id,
                    resource_name: truncate_on_char_boundary(resource_name, MAX_RESOURCE_NAME_LEN),
                    access_mask,
                    acquired_at: Utc::now(),
                });
                Ok(token_id)
            }
            Err(e) => {
                self.events.publish_token_event(TokenEvent::TokenAcquisitionFailed {
                    task_id,
                    resource_name: truncate_on_char_boundary(resource_name, MAX_RESOURCE_NAME_LEN),
                    failed_at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    pub fn release_token(&self, token_id: TokenId) -> Result<(), GovernanceError> {
        if let Some(previous_owner) = self.tokens.release(token_id)? {
            self.events.publish_token_event(TokenEvent::TokenReleased {
                token_id,
                previous_owner: Some(previous_owner),
                released_at: Utc::now(),
            });
        }
        Ok(())
    }

    pub fn mark_transferable(&self, token_id: TokenId, transferable: bool) -> Result<(), GovernanceError> {
        self.tokens.mark_transferable(token_id, transferable)?;
        debug!(token_id = %token_id, transferable, "Token transferability changed");
        self.events.publish_token_event(TokenEvent::TransferabilityChanged {
            token_id,
            transferable,
            changed_at: Utc::now(),
        });
        Ok(())
    }

    /// Free tokens whose owner is no longer registered, typically left
    /// behind by Immediate destruction. Returns how many were freed.
    ///
    /// The pool is swept while the registry is pinned, so a task registered
    /// mid-sweep cannot have its fresh tokens mistaken for leaked ones.
    pub fn reclaim_leaked_tokens(&self) -> usize {
        let reclaimed = self
            .registry
            .with_live_view(|is_live| self.tokens.reclaim_unowned(is_live));
        if reclaimed.is_empty() {
            return 0;
        }

        warn!(count = reclaimed.len(), tokens = ?reclaimed, "Reclaimed leaked resource tokens");
        let count = reclaimed.len();
        self.events.publish_token_event(TokenEvent::TokensReclaimed {
            token_ids: reclaimed,
            reclaimed_at: Utc::now(),
        });
        count
    }

    // ------------------------------------------------------------------
    // Context switch
    // ------------------------------------------------------------------

    /// Hand control from `from` to `to`, moving every transferable token.
    ///
    /// Denied pairs change nothing. Positions are read under the registry
    /// lock, which is released before the pool lock is taken.
    pub async fn context_switch(&self, from: TaskId, to: TaskId) -> Result<TransferCount, GovernanceError> {
        let parties = self.registry.switch_parties(from, to)?;
        let (from_position, from_control) = parties.from;
        let (to_position, to_control) = parties.to;

        let Some(relation) = HierarchyValidator::relation(&from_position, &to_position) else {
            warn!(from = %from, to = %to, "Context switch denied: tasks are not in the same hierarchy");
            self.events.publish_switch_event(ContextSwitchEvent::ContextSwitchDenied {
                from,
                to,
                denied_at: Utc::now(),
            });
            return Err(GovernanceError::PermissionDenied { from, to });
        };

        let transferred = self.tokens.transfer_owned(from, to);
        from_control.record_context_switch();
        to_control.record_context_switch();

        let count = transferred.len();
        info!(from = %from, to = %to, relation = ?relation, transferred = count, "Context switched");
        self.events.publish_switch_event(ContextSwitchEvent::ContextSwitched {
            from,
            to,
            relation,
            transferred,
            switched_at: Utc::now(),
        });

        tokio::task::yield_now().await;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn query_task(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.registry.snapshot(task_id)
    }

    pub fn query_token(&self, token_id: TokenId) -> Option<ResourceToken> {
        self.tokens.get(token_id)
    }

    pub fn tokens_owned_by(&self, task_id: TaskId) -> Vec<ResourceToken> {
        self.tokens.tokens_owned_by(task_id)
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.registry.snapshots()
    }

    pub fn report(&self) -> GovernanceReport {
        let tasks = self.registry.snapshots();
        GovernanceReport {
            generated_at: Utc::now(),
            registry_capacity: self.registry.limits().capacity,
            live_tasks: tasks.len(),
            daemon_tasks: tasks.iter().filter(|t| t.daemon_mode).count(),
            token_capacity: self.tokens.capacity(),
            tokens_in_use: self.tokens.in_use(),
            tasks,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventReceiver {
        self.events.subscribe_task(task_id)
    }
}

/// Wrapper run as the tokio task of every governed execution.
async fn run_task<F, Fut>(ctx: TaskContext, body: F, registry: Arc<TaskRegistry>, events: EventBus)
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let control = ctx.control().clone();
    let task_id = control.task_id();

    let outcome = AssertUnwindSafe(async move { body(ctx).await })
        .catch_unwind()
        .await;

    let reason = match outcome {
        Ok(()) => control.mark_exited(StopReason::Completed),
        Err(panic) => {
            error!(task_id = %task_id, panic = %panic_message(panic.as_ref()), "Task body panicked");
            control.mark_exited(StopReason::Panicked)
        }
    };

    if registry.remove_exited(task_id, &control) {
        debug!(task_id = %task_id, "Exited task removed from registry");
    }
    info!(task_id = %task_id, reason = %reason, heartbeats = control.heartbeat_count(), "Task exited");
    events.publish_lifecycle_event(TaskLifecycleEvent::TaskExited {
        task_id,
        reason,
        heartbeats: control.heartbeat_count(),
        exited_at: Utc::now(),
    });
}

/// Join a claimed execution, then drop its record and announce it.
async fn reap_task(
    task_id: TaskId,
    control: Arc<TaskControl>,
    handle: JoinHandle<()>,
    registry: Arc<TaskRegistry>,
    events: EventBus,
) -> Result<(), GovernanceError> {
    let joined = handle.await;
    registry.remove_terminated(task_id, &control);

    let outcome = match joined {
        Ok(()) if control.stop_reason() == Some(StopReason::Panicked) => {
            Err(GovernanceError::ExecutionFailed {
                task: task_id,
                reason: "task body panicked".to_string(),
            })
        }
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(GovernanceError::ExecutionFailed {
            task: task_id,
            reason: e.to_string(),
        }),
    };
    if let Err(e) = &outcome {
        error!(task_id = %task_id, error = %e, "Terminated task did not exit cleanly");
    }

    events.publish_lifecycle_event(TaskLifecycleEvent::TaskTerminated {
        task_id,
        terminated_at: Utc::now(),
    });
    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

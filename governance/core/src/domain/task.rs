// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Governed Task Model
//!
//! Defines the identity, policy and live control block of a governed task:
//!
//! - [`TaskId`]: caller-assigned integer identity, unique per registry.
//! - [`TaskPolicy`]: everything fixed at spawn time (parent, destroy policy,
//!   caps, concurrency mode).
//! - [`TaskControl`]: the lock-free block shared between the registry record
//!   and the task's own execution; the heartbeat contract is evaluated here.
//! - [`TaskSnapshot`]: read-only view returned by `query_task`.
//!
//! ## Heartbeat order
//! | Step | Condition | Verdict |
//! |------|-----------|---------|
//! | a | `trace_capped && generation_depth > max_trace_depth` | stop |
//! | b | `max_execution_time` set and exceeded | stop |
//! | c | `termination_requested` (after stamping `last_heartbeat`) | stop |
//! | d | simulated + `return_to_main_required`, every N ticks | yield |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Upper bound on the stored spawn location, matching the telemetry record.
pub const MAX_SPAWN_LOCATION_LEN: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// What happens to a child when its parent is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyPolicy {
    /// Terminate and join the child, then apply its own children's policies.
    Cascade,
    /// Orphan the child into a daemon when `keep_alive` is set, otherwise cascade.
    KeepAlive,
    /// Raise the termination flag and let the child stop on its next heartbeat.
    Graceful,
    /// Abort the child's execution without joining. Held tokens may leak.
    Immediate,
}

impl DestroyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestroyPolicy::Cascade => "cascade",
            DestroyPolicy::KeepAlive => "keep_alive",
            DestroyPolicy::Graceful => "graceful",
            DestroyPolicy::Immediate => "immediate",
        }
    }
}

impl fmt::Display for DestroyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Cooperative: the task must yield back on its own heartbeat cadence.
    Simulated,
    /// Preemptible by the host scheduler; no self-yield required.
    Hardware,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Simulated => "simulated",
            ConcurrencyMode::Hardware => "hardware",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spawn-time policy for a governed task.
///
/// `max_execution_time` is tri-state: `None` inherits the engine default,
/// `Some(Duration::ZERO)` means unlimited, anything else is a hard cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPolicy {
    pub task_id: TaskId,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    pub destroy_policy: DestroyPolicy,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default = "default_concurrency_mode")]
    pub concurrency_mode: ConcurrencyMode,
    #[serde(default = "default_true")]
    pub trace_capped: bool,
    #[serde(default = "default_max_trace_depth")]
    pub max_trace_depth: u32,
    #[serde(default, with = "humantime_serde")]
    pub max_execution_time: Option<Duration>,
    #[serde(default = "default_true")]
    pub return_to_main_required: bool,
    #[serde(default = "default_spawn_location")]
    pub spawn_location: String,
}

fn default_concurrency_mode() -> ConcurrencyMode {
    ConcurrencyMode::Simulated
}

fn default_true() -> bool {
    true
}

fn default_max_trace_depth() -> u32 {
    3
}

fn default_spawn_location() -> String {
    "unspecified".to_string()
}

impl TaskPolicy {
    pub fn new(task_id: TaskId, parent_id: Option<TaskId>, destroy_policy: DestroyPolicy) -> Self {
        Self {
            task_id,
            parent_id,
            destroy_policy,
            keep_alive: false,
            concurrency_mode: default_concurrency_mode(),
            trace_capped: true,
            max_trace_depth: default_max_trace_depth(),
            max_execution_time: None,
            return_to_main_required: true,
            spawn_location: default_spawn_location(),
        }
    }

    /// Root task with no parent.
    pub fn root(task_id: TaskId, destroy_policy: DestroyPolicy) -> Self {
        Self::new(task_id, None, destroy_policy)
    }

    /// Child of `parent_id`.
    pub fn child(task_id: TaskId, parent_id: TaskId, destroy_policy: DestroyPolicy) -> Self {
        Self::new(task_id, Some(parent_id), destroy_policy)
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }

    /// `None` disables the trace cap entirely.
    pub fn with_trace_cap(mut self, max_trace_depth: Option<u32>) -> Self {
        match max_trace_depth {
            Some(depth) => {
                self.trace_capped = true;
                self.max_trace_depth = depth;
            }
            None => self.trace_capped = false,
        }
        self
    }

    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }

    pub fn with_return_to_main(mut self, required: bool) -> Self {
        self.return_to_main_required = required;
        self
    }

    pub fn with_spawn_location(mut self, location: impl Into<String>) -> Self {
        self.spawn_location = location.into();
        self
    }
}

/// Why a task's execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TraceDepthExceeded,
    ExecutionTimeExceeded,
    TerminationRequested,
    /// The body returned without being told to stop.
    Completed,
    Panicked,
    /// Hard-stopped by an Immediate destruction; the body never saw it.
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::TraceDepthExceeded => "trace depth exceeded",
            StopReason::ExecutionTimeExceeded => "execution time limit exceeded",
            StopReason::TerminationRequested => "termination requested",
            StopReason::Completed => "completed",
            StopReason::Panicked => "panicked",
            StopReason::Aborted => "aborted",
        };
        f.write_str(text)
    }
}

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    Continue { tick: u64, yield_now: bool },
    Stop(StopReason),
}

impl HeartbeatVerdict {
    pub fn is_stop(&self) -> bool {
        matches!(self, HeartbeatVerdict::Stop(_))
    }
}

/// Engine-wide defaults folded into every control block at spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionDefaults {
    pub max_execution_time: Option<Duration>,
    pub yield_every_ticks: u32,
}

/// Live control block of one task.
///
/// Shared between the registry record and the task's
/// [`TaskContext`](crate::application::heartbeat::TaskContext). Everything the heartbeat
/// touches is atomic so the hot loop never takes the registry lock.
#[derive(Debug)]
pub struct TaskControl {
    task_id: TaskId,
    generation_depth: u32,
    concurrency_mode: ConcurrencyMode,
    trace_capped: bool,
    max_trace_depth: u32,
    max_execution_time: Option<Duration>,
    return_to_main_required: bool,
    yield_every_ticks: u32,
    started: Instant,
    last_heartbeat_nanos: AtomicU64,
    heartbeat_count: AtomicU64,
    context_switch_count: AtomicU64,
    termination_requested: AtomicBool,
    exited: AtomicBool,
    stop_reason: OnceLock<StopReason>,
}

impl TaskControl {
    pub fn new(policy: &TaskPolicy, generation_depth: u32, defaults: ExecutionDefaults) -> Self {
        let max_execution_time = policy
            .max_execution_time
            .or(defaults.max_execution_time)
            .filter(|limit| !limit.is_zero());

        Self {
            task_id: policy.task_id,
            generation_depth,
            concurrency_mode: policy.concurrency_mode,
            trace_capped: policy.trace_capped,
            max_trace_depth: policy.max_trace_depth,
            max_execution_time,
            return_to_main_required: policy.return_to_main_required,
            yield_every_ticks: defaults.yield_every_ticks,
            started: Instant::now(),
            last_heartbeat_nanos: AtomicU64::new(0),
            heartbeat_count: AtomicU64::new(0),
            context_switch_count: AtomicU64::new(0),
            termination_requested: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            stop_reason: OnceLock::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn generation_depth(&self) -> u32 {
        self.generation_depth
    }

    pub fn concurrency_mode(&self) -> ConcurrencyMode {
        self.concurrency_mode
    }

    pub fn trace_capped(&self) -> bool {
        self.trace_capped
    }

    pub fn max_trace_depth(&self) -> u32 {
        self.max_trace_depth
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time
    }

    pub fn return_to_main_required(&self) -> bool {
        self.return_to_main_required
    }

    /// Raise the termination flag. Returns `false` if it was already raised.
    pub fn request_termination(&self) -> bool {
        !self.termination_requested.swap(true, Ordering::AcqRel)
    }

    pub fn termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::Acquire)
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat_count.load(Ordering::Relaxed)
    }

    pub fn context_switch_count(&self) -> u64 {
        self.context_switch_count.load(Ordering::Relaxed)
    }

    pub fn record_context_switch(&self) {
        self.context_switch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the last heartbeat, or since creation if none was seen.
    pub fn since_last_heartbeat(&self) -> Duration {
        let last = Duration::from_nanos(self.last_heartbeat_nanos.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason.get().copied()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Called once the execution body has returned (or unwound).
    pub fn mark_exited(&self, reason: StopReason) -> StopReason {
        let _ = self.stop_reason.set(reason);
        self.exited.store(true, Ordering::Release);
        self.stop_reason().unwrap_or(reason)
    }

    /// Evaluate the heartbeat contract for one tick.
    pub fn check(&self) -> HeartbeatVerdict {
        let tick = self.heartbeat_count.fetch_add(1, Ordering::Relaxed) + 1;

        if self.trace_capped && self.generation_depth > self.max_trace_depth {
            return self.stop(StopReason::TraceDepthExceeded);
        }

        if let Some(limit) = self.max_execution_time {
            if self.started.elapsed() > limit {
                return self.stop(StopReason::ExecutionTimeExceeded);
            }
        }

        self.stamp_heartbeat();

        if self.termination_requested() {
            return self.stop(StopReason::TerminationRequested);
        }

        let yield_now = self.concurrency_mode == ConcurrencyMode::Simulated
            && self.return_to_main_required
            && self.yield_every_ticks > 0
            && tick % u64::from(self.yield_every_ticks) == 0;

        HeartbeatVerdict::Continue { tick, yield_now }
    }

    fn stamp_heartbeat(&self) {
        let nanos = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_heartbeat_nanos.store(nanos, Ordering::Relaxed);
    }

    fn stop(&self, reason: StopReason) -> HeartbeatVerdict {
        let _ = self.stop_reason.set(reason);
        HeartbeatVerdict::Stop(reason)
    }
}

/// Point-in-time view of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub parent_id: Option<TaskId>,
    pub destroy_policy: DestroyPolicy,
    pub keep_alive: bool,
    pub daemon_mode: bool,
    pub concurrency_mode: ConcurrencyMode,
    pub trace_capped: bool,
    pub max_trace_depth: u32,
    pub generation_depth: u32,
    #[serde(with = "humantime_serde")]
    pub max_execution_time: Option<Duration>,
    pub return_to_main_required: bool,
    pub created_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    #[serde(with = "humantime_serde")]
    pub since_last_heartbeat: Duration,
    pub heartbeat_count: u64,
    pub context_switch_count: u64,
    pub termination_requested: bool,
    /// Set while `terminate` is waiting for the execution to join.
    pub terminating: bool,
    pub child_count: usize,
    pub spawn_location: String,
}

/// Cut `text` to at most `max_len` bytes without splitting a character.
pub(crate) fn truncate_on_char_boundary(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

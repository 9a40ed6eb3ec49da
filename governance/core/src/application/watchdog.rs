// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Liveness Watchdog - Background sweep over governed tasks
//!
//! Caps are only enforced when a task heartbeats, so a body that stops
//! heartbeating is invisible to them. The watchdog periodically asks such
//! tasks to stop and frees tokens whose owner is gone.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Stale-task detection and leaked-token reclamation

use crate::application::engine::GovernanceEngine;
use crate::domain::config::WatchdogConfig;
use crate::domain::events::TaskLifecycleEvent;
use crate::domain::task::TaskId;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub flagged: Vec<TaskId>,
    pub reclaimed_tokens: usize,
}

pub struct LivenessWatchdog {
    engine: GovernanceEngine,
    config: WatchdogConfig,
    shutdown_token: CancellationToken,
}

impl LivenessWatchdog {
    pub fn new(engine: GovernanceEngine, config: WatchdogConfig) -> Self {
        Self {
            engine,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Built from the engine's own `watchdog` section.
    pub fn from_engine(engine: GovernanceEngine) -> Self {
        let config = engine.config().watchdog.clone();
        Self::new(engine, config)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Liveness watchdog is disabled");
            return;
        }

        info!(
            stale_after_ms = self.config.stale_after.as_millis() as u64,
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            "Starting liveness watchdog"
        );

        let mut tick = interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let outcome = self.sweep_once();
                    if !outcome.flagged.is_empty() || outcome.reclaimed_tokens > 0 {
                        info!(
                            flagged = outcome.flagged.len(),
                            reclaimed_tokens = outcome.reclaimed_tokens,
                            "Watchdog sweep completed"
                        );
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping liveness watchdog");
                    break;
                }
            }
        }
    }

    /// Run one sweep immediately, regardless of `enabled`.
    pub fn sweep_once(&self) -> SweepOutcome {
        debug!("Running watchdog sweep");
        let registry = self.engine.registry();
        let mut outcome = SweepOutcome::default();

        for (task_id, age) in registry.stale(self.config.stale_after) {
            if !registry.request_termination(task_id) {
                continue;
            }
            let since_last_heartbeat_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
            warn!(task_id = %task_id, since_last_heartbeat_ms, "Stale task asked to stop");
            self.engine
                .events()
                .publish_lifecycle_event(TaskLifecycleEvent::TaskFlaggedStale {
                    task_id,
                    since_last_heartbeat_ms,
                    flagged_at: Utc::now(),
                });
            outcome.flagged.push(task_id);
        }

        if self.config.reclaim_leaked_tokens {
            outcome.reclaimed_tokens = self.engine.reclaim_leaked_tokens();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::GovernanceConfig;
    use crate::domain::task::{DestroyPolicy, TaskPolicy};
    use std::time::Duration;

    fn engine() -> GovernanceEngine {
        GovernanceEngine::new(GovernanceConfig {
            heartbeat_interval: Duration::from_millis(10),
            ..GovernanceConfig::default()
        })
        .unwrap()
    }

    fn watchdog_config() -> WatchdogConfig {
        WatchdogConfig {
            enabled: true,
            stale_after: Duration::from_millis(30),
            sweep_interval: Duration::from_millis(10),
            reclaim_leaked_tokens: true,
        }
    }

    #[tokio::test]
    async fn test_sweep_flags_silent_task_only() {
        let engine = engine();
        engine.spawn_worker(TaskPolicy::root(TaskId(1), DestroyPolicy::Cascade)).unwrap();
        // never heartbeats
        let silent = engine
            .spawn(TaskPolicy::root(TaskId(2), DestroyPolicy::Cascade), |ctx| async move {
                while !ctx.should_stop() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let watchdog = LivenessWatchdog::new(engine.clone(), watchdog_config());
        let outcome = watchdog.sweep_once();

        assert_eq!(outcome.flagged, vec![TaskId(2)]);
        assert!(silent.termination_requested());
        assert!(watchdog.sweep_once().flagged.is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_watchdog_exits_immediately() {
        let watchdog = Arc::new(LivenessWatchdog::new(engine(), WatchdogConfig::default()));
        tokio::time::timeout(Duration::from_secs(1), watchdog.start())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_stops_on_cancel() {
        let watchdog = Arc::new(LivenessWatchdog::new(engine(), watchdog_config()));
        let token = watchdog.shutdown_token();
        let handle = watchdog.start();

        tokio::time::sleep(Duration::from_millis(25)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

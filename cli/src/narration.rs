// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Human-readable rendering of governance events.

use colored::Colorize;
use rift_governance_core::{
    ContextSwitchEvent, EventBusError, EventReceiver, GovernanceEvent, TaskLifecycleEvent,
    TokenEvent,
};

pub fn describe(event: &GovernanceEvent) -> String {
    match event {
        GovernanceEvent::Lifecycle(event) => describe_lifecycle(event),
        GovernanceEvent::Token(event) => describe_token(event),
        GovernanceEvent::ContextSwitch(event) => describe_switch(event),
    }
}

fn describe_lifecycle(event: &TaskLifecycleEvent) -> String {
    match event {
        TaskLifecycleEvent::TaskSpawned { task_id, parent_id, destroy_policy, generation_depth, .. } => {
            let parent = parent_id.map_or_else(|| "root".to_string(), |p| format!("parent {p}"));
            format!(
                "{} task {task_id} ({parent}, policy {destroy_policy}, depth {generation_depth})",
                "spawn".green().bold()
            )
        }
        TaskLifecycleEvent::ParentDestructionRequested { parent_id, child_count, .. } => format!(
            "{} parent {parent_id} destroyed, applying policies to {child_count} children",
            "destroy".red().bold()
        ),
        TaskLifecycleEvent::ChildCascaded { task_id, parent_id, .. } => format!(
            "{} task {task_id} terminated with parent {parent_id}",
            "cascade".red()
        ),
        TaskLifecycleEvent::ChildOrphaned { task_id, former_parent_id, .. } => format!(
            "{} task {task_id} left parent {former_parent_id} and runs as a daemon",
            "orphan".cyan()
        ),
        TaskLifecycleEvent::GracefulShutdownRequested { task_id, .. } => format!(
            "{} task {task_id} asked to stop on its next heartbeat",
            "graceful".yellow()
        ),
        TaskLifecycleEvent::ChildAborted { task_id, .. } => {
            format!("{} task {task_id} hard-stopped", "abort".red().bold())
        }
        TaskLifecycleEvent::TaskTerminated { task_id, .. } => {
            format!("{} task {task_id} joined and removed", "terminated".dimmed())
        }
        TaskLifecycleEvent::TaskExited { task_id, reason, heartbeats, .. } => format!(
            "{} task {task_id} ({reason}, {heartbeats} heartbeats)",
            "exit".dimmed()
        ),
        TaskLifecycleEvent::TaskFlaggedStale { task_id, since_last_heartbeat_ms, .. } => format!(
            "{} task {task_id} silent for {since_last_heartbeat_ms}ms",
            "stale".yellow().bold()
        ),
    }
}

fn describe_token(event: &TokenEvent) -> String {
    match event {
        TokenEvent::TokenAcquired { token_id, task_id, resource_name, access_mask, .. } => format!(
            "{} token {token_id} -> task {task_id} ({resource_name}, mask {access_mask})",
            "acquire".blue()
        ),
        TokenEvent::TokenAcquisitionFailed { task_id, resource_name, .. } => format!(
            "{} task {task_id} could not claim {resource_name}: pool exhausted",
            "acquire".red()
        ),
        TokenEvent::TokenReleased { token_id, previous_owner, .. } => {
            let owner = previous_owner.map_or_else(|| "nobody".to_string(), |o| format!("task {o}"));
            format!("{} token {token_id} (was held by {owner})", "release".blue())
        }
        TokenEvent::TransferabilityChanged { token_id, transferable, .. } => format!(
            "{} token {token_id} transferable = {transferable}",
            "mark".blue()
        ),
        TokenEvent::TokensReclaimed { token_ids, .. } => format!(
            "{} {} leaked tokens",
            "reclaim".yellow(),
            token_ids.len()
        ),
    }
}

fn describe_switch(event: &ContextSwitchEvent) -> String {
    match event {
        ContextSwitchEvent::ContextSwitched { from, to, relation, transferred, .. } => format!(
            "{} {from} -> {to} ({relation:?}), {} tokens moved",
            "switch".magenta().bold(),
            transferred.len()
        ),
        ContextSwitchEvent::ContextSwitchDenied { from, to, .. } => format!(
            "{} {from} -> {to}: not in the same hierarchy",
            "denied".red().bold()
        ),
    }
}

/// Print every event already buffered on `receiver`.
pub fn drain(receiver: &mut EventReceiver, as_json: bool) {
    loop {
        match receiver.try_recv() {
            Ok(event) => {
                if as_json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!("Failed to serialize event: {}", e),
                    }
                } else {
                    println!("  {}", describe(&event));
                }
            }
            Err(EventBusError::Lagged(missed)) => {
                println!("  {}", format!("({missed} events dropped)").dimmed());
            }
            Err(EventBusError::Empty) | Err(EventBusError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_governance_core::{DestroyPolicy, TaskId};

    #[test]
    fn test_describe_spawn_mentions_parent() {
        colored::control::set_override(false);
        let event = GovernanceEvent::Lifecycle(TaskLifecycleEvent::TaskSpawned {
            task_id: TaskId(101),
            parent_id: Some(TaskId(100)),
            destroy_policy: DestroyPolicy::Cascade,
            generation_depth: 1,
            spawned_at: chrono::Utc::now(),
        });

        assert_eq!(
            describe(&event),
            "spawn task 101 (parent 100, policy cascade, depth 1)"
        );
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Narrated governance scenario
//!
//! Spawns a parent with three children, one per destroy policy, moves a
//! transferable token along a sibling chain, shows a denied switch, then
//! destroys the parent and narrates every event the engine publishes.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use rift_governance_core::{
    AccessMask, DestroyPolicy, GovernanceConfig, GovernanceEngine, GovernanceError, TaskId,
    TaskPolicy,
};

use crate::narration;

const PARENT: TaskId = TaskId(100);
const CASCADE_CHILD: TaskId = TaskId(101);
const KEEP_ALIVE_CHILD: TaskId = TaskId(102);
const GRACEFUL_CHILD: TaskId = TaskId(103);
const OUTSIDER: TaskId = TaskId(200);

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// How long the workers heartbeat before the context switches
    #[arg(long, default_value_t = 300, value_name = "MS")]
    pub run_for_ms: u64,

    /// Emit events as JSON lines instead of narration
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: DemoArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = GovernanceConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;
    let engine = GovernanceEngine::new(config).context("Failed to start governance engine")?;
    let mut events = engine.subscribe();
    let json = args.json;

    section(json, "Spawning task hierarchy");
    engine.spawn_worker(TaskPolicy::root(PARENT, DestroyPolicy::Cascade).with_spawn_location("riftgov demo"))?;
    engine.spawn_worker(TaskPolicy::child(CASCADE_CHILD, PARENT, DestroyPolicy::Cascade))?;
    engine.spawn_worker(
        TaskPolicy::child(KEEP_ALIVE_CHILD, PARENT, DestroyPolicy::KeepAlive).with_keep_alive(true),
    )?;
    engine.spawn_worker(TaskPolicy::child(GRACEFUL_CHILD, PARENT, DestroyPolicy::Graceful))?;
    engine.spawn_worker(TaskPolicy::root(OUTSIDER, DestroyPolicy::Cascade))?;
    narration::drain(&mut events, json);

    section(json, "Acquiring resource tokens");
    let shared_memory = engine.acquire_token(CASCADE_CHILD, "shared_memory", AccessMask::READ_WRITE)?;
    engine.mark_transferable(shared_memory, true)?;
    let file_handle = engine.acquire_token(KEEP_ALIVE_CHILD, "file_handle", AccessMask::READ)?;
    let network_socket = engine.acquire_token(GRACEFUL_CHILD, "network_socket", AccessMask::WRITE)?;
    narration::drain(&mut events, json);

    tokio::time::sleep(Duration::from_millis(args.run_for_ms)).await;

    section(json, "Context switches");
    engine.context_switch(CASCADE_CHILD, KEEP_ALIVE_CHILD).await?;
    engine.context_switch(KEEP_ALIVE_CHILD, GRACEFUL_CHILD).await?;
    match engine.context_switch(CASCADE_CHILD, OUTSIDER).await {
        Err(GovernanceError::PermissionDenied { .. }) => {}
        Err(e) => return Err(e.into()),
        Ok(_) => anyhow::bail!("switch across hierarchies was not denied"),
    }
    narration::drain(&mut events, json);

    section(json, "Releasing tokens");
    for token in [shared_memory, file_handle, network_socket] {
        engine.release_token(token)?;
    }
    narration::drain(&mut events, json);

    if !json {
        print_tasks(&engine);
    }

    section(json, "Destroying parent");
    let report = engine.destroy(PARENT).await?;
    narration::drain(&mut events, json);

    let graceful_stopped = tokio::time::timeout(Duration::from_secs(2), async {
        while engine.query_task(GRACEFUL_CHILD).is_some() {
            tokio::time::sleep(engine.config().heartbeat_interval).await;
        }
    })
    .await
    .is_ok();
    narration::drain(&mut events, json);

    if !json {
        println!();
        println!("{}", "Destruction report:".bold());
        println!("  Cascaded: {:?}", report.cascaded);
        println!("  Orphaned: {:?}", report.orphaned);
        println!("  Signalled: {:?}", report.signalled);
        if !graceful_stopped {
            println!("  {}", "graceful child did not stop within 2s".yellow());
        }
        print_tasks(&engine);
    }

    section(json, "Shutting down");
    engine.shutdown().await;
    narration::drain(&mut events, json);

    Ok(())
}

fn section(json: bool, title: &str) {
    if !json {
        println!();
        println!("{}", title.bold().underline());
    }
}

fn print_tasks(engine: &GovernanceEngine) {
    let report = engine.report();
    println!();
    println!(
        "{} ({} live, {} daemon, {}/{} tokens in use)",
        "Registry".bold(),
        report.live_tasks,
        report.daemon_tasks,
        report.tokens_in_use,
        report.token_capacity
    );
    for task in &report.tasks {
        let parent = task
            .parent_id
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "  {:>5}  parent {:>5}  {:<10}  depth {}  heartbeats {:>4}  switches {}{}",
            task.task_id.as_u64(),
            parent,
            task.destroy_policy.as_str(),
            task.generation_depth,
            task.heartbeat_count,
            task.context_switch_count,
            if task.daemon_mode { "  daemon".cyan().to_string() } else { String::new() }
        );
    }
}

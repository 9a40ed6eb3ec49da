// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Governance Engine Configuration
//
// Construction-time settings for a GovernanceEngine:
// - Registry and token pool capacities
// - Heartbeat cadence and the default execution time cap
// - Hierarchy limits (children per parent, generation depth)
// - Cooperative yield cadence for simulated tasks
// - Optional liveness watchdog

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "RIFT_GOVERNANCE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "./rift-governance.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Maximum number of live tasks
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Number of resource tokens preallocated in the pool
    #[serde(default = "default_token_capacity")]
    pub token_capacity: usize,

    /// Sleep between ticks of `TaskContext::tick` and the built-in worker loop
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Cap applied to tasks whose policy does not set one (None or 0 = unlimited)
    #[serde(default = "default_max_execution_time", with = "humantime_serde")]
    pub default_max_execution_time: Option<Duration>,

    #[serde(default = "default_max_children_per_parent")]
    pub max_children_per_parent: usize,

    #[serde(default = "default_max_hierarchy_depth")]
    pub max_hierarchy_depth: u32,

    /// Simulated tasks yield back every N heartbeats (0 = never)
    #[serde(default = "default_yield_every_ticks")]
    pub yield_every_ticks: u32,

    /// Events buffered per subscriber before the oldest are dropped
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub enabled: bool,

    /// A task whose last heartbeat is older than this is asked to stop
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Release tokens whose owner is no longer registered on every sweep
    #[serde(default = "default_true")]
    pub reclaim_leaked_tokens: bool,
}

fn default_registry_capacity() -> usize {
    256
}

fn default_token_capacity() -> usize {
    64
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_execution_time() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn default_max_children_per_parent() -> usize {
    32
}

fn default_max_hierarchy_depth() -> u32 {
    8
}

fn default_yield_every_ticks() -> u32 {
    10
}

fn default_event_bus_capacity() -> usize {
    1000
}

fn default_stale_after() -> Duration {
    Duration::from_secs(2)
}

fn default_sweep_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_true() -> bool {
    true
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stale_after: default_stale_after(),
            sweep_interval: default_sweep_interval(),
            reclaim_leaked_tokens: true,
        }
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            registry_capacity: default_registry_capacity(),
            token_capacity: default_token_capacity(),
            heartbeat_interval: default_heartbeat_interval(),
            default_max_execution_time: default_max_execution_time(),
            max_children_per_parent: default_max_children_per_parent(),
            max_hierarchy_depth: default_max_hierarchy_depth(),
            yield_every_ticks: default_yield_every_ticks(),
            event_bus_capacity: default_event_bus_capacity(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl GovernanceConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. RIFT_GOVERNANCE_CONFIG environment variable
    /// 2. ./rift-governance.yaml (working directory)
    /// 3. ~/.rift/governance.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from(DEFAULT_CONFIG_FILE);
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".rift").join("governance.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading governance configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load governance config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading governance configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No governance configuration file found. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<usize>("RIFT_REGISTRY_CAPACITY") {
            tracing::info!("Environment override: RIFT_REGISTRY_CAPACITY={}", value);
            self.registry_capacity = value;
        }
        if let Some(value) = env_parse::<usize>("RIFT_TOKEN_CAPACITY") {
            tracing::info!("Environment override: RIFT_TOKEN_CAPACITY={}", value);
            self.token_capacity = value;
        }
        if let Some(value) = env_parse::<u64>("RIFT_HEARTBEAT_INTERVAL_MS") {
            tracing::info!("Environment override: RIFT_HEARTBEAT_INTERVAL_MS={}", value);
            self.heartbeat_interval = Duration::from_millis(value);
        }
        if let Some(value) = env_parse::<u64>("RIFT_MAX_EXECUTION_TIME_MS") {
            tracing::info!("Environment override: RIFT_MAX_EXECUTION_TIME_MS={}", value);
            self.default_max_execution_time = Some(Duration::from_millis(value));
        }
        if let Ok(val) = std::env::var("RIFT_WATCHDOG_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.watchdog.enabled = true,
                "false" | "0" | "no" | "off" => self.watchdog.enabled = false,
                _ => {
                    tracing::warn!(
                        "Invalid value for RIFT_WATCHDOG_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry_capacity == 0 {
            anyhow::bail!("registry_capacity must be at least 1");
        }
        if self.token_capacity == 0 {
            anyhow::bail!("token_capacity must be at least 1");
        }
        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than zero");
        }
        if self.max_children_per_parent == 0 {
            anyhow::bail!("max_children_per_parent must be at least 1");
        }
        if self.event_bus_capacity == 0 {
            anyhow::bail!("event_bus_capacity must be at least 1");
        }
        if self.watchdog.enabled {
            if self.watchdog.sweep_interval.is_zero() {
                anyhow::bail!("watchdog.sweep_interval must be greater than zero");
            }
            if self.watchdog.stale_after <= self.heartbeat_interval {
                anyhow::bail!(
                    "watchdog.stale_after ({:?}) must be longer than heartbeat_interval ({:?})",
                    self.watchdog.stale_after,
                    self.heartbeat_interval
                );
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", key, raw);
            None
        }
    }
}

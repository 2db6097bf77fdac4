//! Process-wide configuration: layered defaults/file/env, plus the single
//! entry point for wiring up a [`GlobalRegistries`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::GlobalRegistries;

/// Configuration for the durable persistence/recovery layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableConfig {
    /// Path to the event/checkpoint store, when a file-backed store is in
    /// use. `None` runs entirely in-memory.
    pub store_path: Option<PathBuf>,

    /// How long a durable `condition`/`sleep` may wait before the run
    /// checkpoints and yields the task, expressed in milliseconds.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
}

fn default_checkpoint_interval_ms() -> u64 {
    5_000
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
        }
    }
}

impl DurableConfig {
    #[must_use]
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

/// Configuration for the 'run' command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Enable verbose console output.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { verbose: false }
    }
}

/// Configuration for the 'recover' command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverConfig {
    /// Enable verbose console output.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RecoverConfig {
    fn default() -> Self {
        Self { verbose: false }
    }
}

/// Global configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub recover: RecoverConfig,
    #[serde(default)]
    pub durable: DurableConfig,
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (`WORKFLOW__*`, highest priority)
    /// 2. Config file (`workflow.yaml` in the current directory or
    ///    `~/.config/workflow-engine/workflow.yaml`)
    /// 3. Defaults (lowest priority)
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let config_builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::File::with_name("workflow").format(config::FileFormat::Yaml).required(false))
            .add_source(
                config::File::with_name(&format!(
                    "{}/.config/workflow-engine/workflow",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .format(config::FileFormat::Yaml)
                .required(false),
            )
            .add_source(config::Environment::with_prefix("WORKFLOW").separator("__").try_parsing(true));

        let config = config_builder.build()?;
        config.try_deserialize()
    }
}

/// Build a [`GlobalRegistries`] via a builder closure, the one place an
/// application wires up its coercions, validators, middleware and
/// callbacks before constructing a `TaskEngine`.
#[must_use]
pub fn configure(build: impl FnOnce(&mut GlobalRegistries)) -> GlobalRegistries {
    let mut registries = GlobalRegistries::new();
    build(&mut registries);
    registries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = EngineConfig::default();
        assert!(!config.run.verbose);
        assert_eq!(config.durable.checkpoint_interval_ms, 5_000);
    }

    #[test]
    fn configure_applies_the_builder() {
        let registries = configure(|registries| {
            registries.coercions.register("loud", std::sync::Arc::new(|v: &serde_json::Value| Some(v.clone())));
        });
        assert!(registries.coercions.get("loud").is_some());
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Default selection budget (rules kept per episode).
pub const DEFAULT_BUDGET: usize = 5;
/// Default number of propose/arbitrate attempts per control step.
pub const DEFAULT_REPLAN_LIMIT: usize = 10;
/// Default maximum number of steps per episode.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct GatekeeperConfig {
    /// Coverage selection settings.
    pub selection: SelectionSettings,
    /// Control loop settings.
    pub control: ControlSettings,
    /// Storage settings.
    pub storage: StorageSettings,
    /// Telemetry sinks.
    pub telemetry: TelemetrySettings,
    source_dir: Option<PathBuf>,
}

impl GatekeeperConfig {
    /// Loads configuration from a TOML file. Relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading gatekeeper config {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml(&raw, source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses configuration text, resolving relative paths against `source_dir`.
    pub fn from_toml(raw: &str, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let document: ConfigSerde = toml::from_str(raw)?;
        if document.selection.budget == 0 {
            bail!("selection.budget must be greater than zero");
        }
        if document.control.replan_limit == 0 {
            bail!("control.replan_limit must be greater than zero");
        }
        if document.control.max_steps == 0 {
            bail!("control.max_steps must be greater than zero");
        }
        let mut config = Self {
            selection: document.selection,
            control: document.control,
            storage: document.storage,
            telemetry: document.telemetry,
            source_dir: Some(source_dir.into()),
        };
        config.storage.root = config.resolve_path(&config.storage.root);
        config.telemetry.log_path = config
            .telemetry
            .log_path
            .as_ref()
            .map(|p| config.resolve_path(p));
        config.telemetry.event_log = config
            .telemetry
            .event_log
            .as_ref()
            .map(|p| config.resolve_path(p));
        Ok(config)
    }

    /// Resolves a path relative to the configuration file.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        let candidate = candidate.as_ref();
        match &self.source_dir {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigSerde {
    #[serde(default)]
    selection: SelectionSettings,
    #[serde(default)]
    control: ControlSettings,
    #[serde(default)]
    storage: StorageSettings,
    #[serde(default)]
    telemetry: TelemetrySettings,
}

/// Coverage selection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionSettings {
    /// Maximum number of rules selected per episode.
    #[serde(default = "default_budget")]
    pub budget: usize,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            budget: default_budget(),
        }
    }
}

/// Control loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlSettings {
    /// Propose/arbitrate attempts per step before committing anyway.
    #[serde(default = "default_replan_limit")]
    pub replan_limit: usize,
    /// Maximum steps per episode.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            replan_limit: default_replan_limit(),
            max_steps: default_max_steps(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Directory holding the collections, library and scene graphs.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Telemetry sinks; both optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetrySettings {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event log.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

const fn default_budget() -> usize {
    DEFAULT_BUDGET
}

const fn default_replan_limit() -> usize {
    DEFAULT_REPLAN_LIMIT
}

const fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("gatekeeper-data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.selection.budget, 5);
        assert_eq!(config.control.replan_limit, 10);
        assert_eq!(config.control.max_steps, 50);
        assert_eq!(config.storage.root, PathBuf::from("gatekeeper-data"));
        assert_eq!(config.resolve_path("x"), PathBuf::from("x"));
    }

    #[test]
    fn loads_and_resolves_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gatekeeper.toml");
        fs::write(
            &path,
            r#"
[selection]
budget = 3

[control]
replan_limit = 4

[storage]
root = "data"

[telemetry]
log_path = "logs/pipeline.log"
event_log = "/var/tmp/events.log"
"#,
        )
        .unwrap();
        let config = GatekeeperConfig::load(&path).unwrap();
        assert_eq!(config.selection.budget, 3);
        assert_eq!(config.control.replan_limit, 4);
        assert_eq!(config.control.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(config.storage.root, dir.path().join("data"));
        assert_eq!(
            config.telemetry.log_path.as_deref(),
            Some(dir.path().join("logs/pipeline.log").as_path())
        );
        assert_eq!(
            config.telemetry.event_log,
            Some(PathBuf::from("/var/tmp/events.log"))
        );
    }

    #[test]
    fn rejects_zero_budget() {
        let err = GatekeeperConfig::from_toml("[selection]\nbudget = 0\n", ".").unwrap_err();
        assert!(err.to_string().contains("budget"));
        assert!(GatekeeperConfig::from_toml("[control]\nreplan_limit = 0\n", ".").is_err());
        assert!(GatekeeperConfig::from_toml("[mystery]\nx = 1\n", ".").is_err());
        assert!(GatekeeperConfig::load("/nonexistent/gatekeeper.toml").is_err());
    }
}

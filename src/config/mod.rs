//! Configuration management for keylink
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use crate::store::StoreOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub widgets: Vec<WidgetConfig>,
}

/// Keyed store tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub resubscribe_on_reconnect: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
            action_timeout_ms: default_action_timeout(),
            resubscribe_on_reconnect: true,
        }
    }
}

impl StoreConfig {
    pub fn to_options(&self) -> StoreOptions {
        StoreOptions {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            action_timeout: Duration::from_millis(self.action_timeout_ms),
            resubscribe_on_reconnect: self.resubscribe_on_reconnect,
        }
    }
}

/// Simulated product
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_true")]
    pub connected_on_start: bool,
    /// Telemetry tick; 0 disables the telemetry task
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_ms: u64,
    #[serde(default = "default_instances")]
    pub cameras: u32,
    #[serde(default = "default_instances")]
    pub batteries: u32,
    /// Initial values overriding catalogue defaults, by key spec
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub seed: HashMap<String, Value>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            connected_on_start: true,
            telemetry_interval_ms: default_telemetry_interval(),
            cameras: default_instances(),
            batteries: default_instances(),
            seed: HashMap::new(),
        }
    }
}

/// Local preference database
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PreferencesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Database directory; defaults to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Logging output
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write a daily-rolling file into the logs directory
    #[serde(default)]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: false,
        }
    }
}

/// Widget kinds the host knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    HeightLimit,
    SdCard,
    Battery,
}

impl WidgetKind {
    pub fn is_indexed(self) -> bool {
        !matches!(self, WidgetKind::HeightLimit)
    }
}

impl std::fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WidgetKind::HeightLimit => write!(f, "height_limit"),
            WidgetKind::SdCard => write!(f, "sd_card"),
            WidgetKind::Battery => write!(f, "battery"),
        }
    }
}

/// One hosted widget
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WidgetConfig {
    pub name: String,
    pub kind: WidgetKind,
    #[serde(default)]
    pub index: u32,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.store.command_timeout_ms == 0 {
            anyhow::bail!("store.command_timeout_ms must be greater than 0");
        }
        if self.store.action_timeout_ms == 0 {
            anyhow::bail!("store.action_timeout_ms must be greater than 0");
        }
        if self.simulator.cameras == 0 || self.simulator.batteries == 0 {
            anyhow::bail!("simulator needs at least one camera and one battery");
        }

        for key in self.simulator.seed.keys() {
            if crate::key::KeyId::parse(key).is_none() {
                anyhow::bail!("simulator.seed key '{}' is not a valid key spec", key);
            }
        }

        let mut names = HashSet::new();
        for (idx, widget) in self.widgets.iter().enumerate() {
            if widget.name.is_empty() {
                anyhow::bail!("Widget {} name cannot be empty", idx);
            }
            if !names.insert(widget.name.as_str()) {
                anyhow::bail!("Duplicate widget name '{}'", widget.name);
            }

            let instances = match widget.kind {
                WidgetKind::HeightLimit => None,
                WidgetKind::SdCard => Some(self.simulator.cameras),
                WidgetKind::Battery => Some(self.simulator.batteries),
            };
            match instances {
                Some(count) if widget.index >= count => anyhow::bail!(
                    "Widget '{}' index {} is out of range (simulator has {} {})",
                    widget.name,
                    widget.index,
                    count,
                    if widget.kind == WidgetKind::SdCard {
                        "cameras"
                    } else {
                        "batteries"
                    }
                ),
                None if widget.index != 0 => {
                    anyhow::bail!("Widget '{}' ({}) takes no index", widget.name, widget.kind)
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Configuration used when no file exists yet
    pub fn starter() -> Self {
        Self {
            widgets: vec![
                WidgetConfig {
                    name: "height".into(),
                    kind: WidgetKind::HeightLimit,
                    index: 0,
                },
                WidgetConfig {
                    name: "storage".into(),
                    kind: WidgetKind::SdCard,
                    index: 0,
                },
                WidgetConfig {
                    name: "battery".into(),
                    kind: WidgetKind::Battery,
                    index: 0,
                },
            ],
            ..Self::default()
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_command_timeout() -> u64 { 5_000 }
fn default_action_timeout() -> u64 { 30_000 }
fn default_telemetry_interval() -> u64 { 1_000 }
fn default_instances() -> u32 { 2 }
fn default_log_level() -> String { "info".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store.to_options(), StoreOptions::default());
    }

    #[test]
    fn test_full_document() {
        let config = AppConfig::from_yaml(
            r#"
store:
  command_timeout_ms: 250
simulator:
  cameras: 3
  seed:
    "Camera.SDCardState[2]": Full
logging:
  level: debug
  json: true
widgets:
  - name: storage
    kind: sd_card
    index: 2
  - name: height
    kind: height_limit
"#,
        )
        .unwrap();

        assert_eq!(config.store.command_timeout_ms, 250);
        assert_eq!(config.store.action_timeout_ms, 30_000);
        assert_eq!(config.simulator.cameras, 3);
        assert_eq!(config.simulator.seed["Camera.SDCardState[2]"], Value::from("Full"));
        assert!(config.logging.json);
        assert_eq!(config.widgets[0].kind, WidgetKind::SdCard);
        assert_eq!(config.widgets[1].index, 0);
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            ("store: {command_timeout_ms: 0}", "command_timeout_ms"),
            (
                "widgets: [{name: a, kind: battery}, {name: a, kind: sd_card}]",
                "Duplicate",
            ),
            ("widgets: [{name: a, kind: battery, index: 2}]", "out of range"),
            ("widgets: [{name: a, kind: height_limit, index: 1}]", "takes no index"),
            ("simulator: {seed: {'not a key': 1}}", "not a valid key"),
        ];
        for (yaml, needle) in cases {
            let err = AppConfig::from_yaml(yaml).unwrap_err();
            assert!(
                format!("{:#}", err).contains(needle),
                "{} -> {:#}",
                yaml,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let config = AppConfig::starter();
        config.save(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap(), config);
    }
}

//! Application path management.
//!
//! Three layouts are recognised, checked in this order:
//!
//! - **Dev**: `config.yaml` in the current directory (debug builds only).
//!   State and logs go next to it.
//! - **Portable**: a `.portable` marker next to the executable keeps every
//!   file in the executable's directory.
//! - **Installed** (default): everything lives under the platform data
//!   directory (`~/.local/share/keylink`, `%APPDATA%\keylink`, ...).

use crate::config::AppConfig;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application name used for directories in installed mode
const APP_NAME: &str = "keylink";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Dev,
    Portable,
    Installed,
}

/// Application paths for config, preferences and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config: PathBuf,
    /// State directory (sled preference database lives below)
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub mode: PathMode,
}

impl AppPaths {
    /// Detect the layout from the process environment.
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let paths = Self::resolve(
            cfg!(debug_assertions).then_some(cwd.as_path()),
            &exe_dir,
            dirs::data_dir(),
        );

        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] {:?} mode, config at {}",
            paths.mode,
            paths.config.display()
        );

        paths
    }

    /// Pick a layout; `dev_dir` is only consulted when given
    pub fn resolve(dev_dir: Option<&Path>, exe_dir: &Path, data_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dev_dir {
            if dir.join("config.yaml").exists() {
                return Self::rooted(dir, PathMode::Dev, ".state");
            }
        }

        if exe_dir.join(".portable").exists() {
            return Self::rooted(exe_dir, PathMode::Portable, ".state");
        }

        let app_data = data_dir
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no data directory, falling back to exe dir");
                exe_dir.to_path_buf()
            })
            .join(APP_NAME);
        Self::rooted(&app_data, PathMode::Installed, "state")
    }

    fn rooted(base: &Path, mode: PathMode, state: &str) -> Self {
        Self {
            config: base.join("config.yaml"),
            state_dir: base.join(state),
            logs_dir: base.join("logs"),
            mode,
        }
    }

    /// Base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Default location of the preference database
    pub fn preferences_db(&self) -> PathBuf {
        self.state_dir.join("preferences")
    }

    /// Create missing directories and a starter config
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.state_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }

        if !self.config.exists() {
            if let Some(parent) = self.config.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let yaml = serde_yaml::to_string(&AppConfig::starter())
                .context("Failed to serialize starter config")?;
            std::fs::write(&self.config, yaml).with_context(|| {
                format!("Failed to write starter config {}", self.config.display())
            })?;
            info!("Wrote starter config to {}", self.config.display());
        }

        Ok(())
    }
}

//! Config and data file locations
//!
//! Priority for both directories:
//! 1. CLI `--config-dir`
//! 2. `FLIPBOOK_CONFIG_DIR` environment variable
//! 3. Current directory, if it already holds a flipbook file
//! 4. Platform directory from dirs-next (`~/.config/flipbook`, `~/.local/share/flipbook`, ...)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "flipbook";
pub const ENV_CONFIG_DIR: &str = "FLIPBOOK_CONFIG_DIR";

/// Files whose presence makes the current directory the config home
const LOCAL_MARKERS: &[&str] = &["flipbook.json", "flipbook.log"];

/// Overrides for the default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// CLI argument wins over the environment
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var_os(ENV_CONFIG_DIR).map(PathBuf::from));
        Self { config_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.resolve(dirs_next::config_dir())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(dirs_next::data_dir())
    }

    fn resolve(&self, platform: Option<PathBuf>) -> PathBuf {
        resolve_dir(
            self.config_dir.as_deref(),
            std::env::current_dir().ok().as_deref(),
            platform,
        )
    }
}

fn resolve_dir(custom: Option<&Path>, cwd: Option<&Path>, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = custom {
        return dir.to_path_buf();
    }
    if let Some(cwd) = cwd.filter(|dir| has_local_files(dir)) {
        return cwd.to_path_buf();
    }
    platform
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn has_local_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config.config_dir().join(name)
}

/// Logs, state dumps
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    config.data_dir().join(name)
}

/// Create config and data directories if missing
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config.config_dir();
    let data_dir = config.data_dir();

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    if data_dir != config_dir {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

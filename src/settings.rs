//! Persistent playback settings (`flipbook.json`)
//!
//! Missing fields fall back to defaults, so older or hand-written files keep
//! loading. CLI flags are merged on top by the runner.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::cache_man::{Budget, ConfigError};
use crate::core::clock::{EndBehavior, FrameRate};
use crate::core::session::SessionConfig;
use crate::core::workers::Workers;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "flipbook.json";

/// Cache budget sources, most specific wins: entries, then bytes, then memory percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub mem_percent: f64, // 1-100% of available memory (default 75%)
    pub reserve_gb: f64,  // Reserve for system (default 2.0 GB)
    pub bytes: Option<usize>,
    pub entries: Option<usize>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            mem_percent: 75.0,
            reserve_gb: 2.0,
            bytes: None,
            entries: None,
        }
    }
}

impl BudgetSettings {
    pub fn resolve(&self) -> Result<Budget, ConfigError> {
        if let Some(n) = self.entries {
            return Budget::Entries(n).validated();
        }
        if let Some(n) = self.bytes {
            return Budget::Bytes(n).validated();
        }
        Budget::from_memory_fraction(self.mem_percent / 100.0, self.reserve_gb)
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub fps_num: u32,
    pub fps_den: u32,
    pub speed: i32, // Initial speed (0 = paused, negative = reverse)
    pub window: usize,
    pub end: EndBehavior,
    pub budget: BudgetSettings,
    pub workers: usize, // 0 = auto
    pub refresh_hz: f64,
    pub stats_interval_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            fps_num: 24,
            fps_den: 1,
            speed: 1,
            window: 16,
            end: EndBehavior::Loop,
            budget: BudgetSettings::default(),
            workers: 0,
            refresh_hz: 60.0,
            stats_interval_ms: 100,
        }
    }
}

impl PlaybackSettings {
    /// Load settings, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        info!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn rate(&self) -> Result<FrameRate, ConfigError> {
        FrameRate::new(self.fps_num, self.fps_den)
    }

    /// Worker thread count, resolving 0 to the machine default
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            Workers::default_threads()
        } else {
            self.workers
        }
    }

    /// Refresh period of the render loop
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_hz.max(1.0))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    /// Session parameters; fails on zero rate, zero budget or a bad memory percent
    pub fn session_config(&self, start_frame: Option<i64>) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig {
            rate: self.rate()?,
            budget: self.budget.resolve()?,
            window: self.window,
            end: self.end,
            speed: self.speed,
            start_frame,
        })
    }
}

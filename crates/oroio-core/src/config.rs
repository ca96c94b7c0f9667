//! Configuration management for oroio
//!
//! Stored as JSON at ~/.config/oroio/config.json. A missing file means defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global oroio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Period of the background alert check (seconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Remaining fraction of the total at or below which a key counts as low
    #[serde(default = "default_low_balance_threshold")]
    pub low_balance_threshold: f64,

    /// How many days before expiry to warn
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,

    /// Show desktop alerts at all
    #[serde(default = "default_notifications")]
    pub notifications: bool,

    /// Command that regenerates the usage cache (program followed by arguments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_command: Option<Vec<String>>,

    /// Upper bound for one run of the fetch command (seconds)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_check_interval() -> u64 {
    5 * 60
}

fn default_low_balance_threshold() -> f64 {
    0.2
}

fn default_expiry_warning_days() -> i64 {
    1
}

fn default_notifications() -> bool {
    true
}

fn default_fetch_timeout() -> u64 {
    60
}

/// Longest accepted expiry warning window
pub const MAX_EXPIRY_WARNING_DAYS: i64 = 3650;

impl Default for Config {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            low_balance_threshold: default_low_balance_threshold(),
            expiry_warning_days: default_expiry_warning_days(),
            notifications: default_notifications(),
            fetch_command: None,
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that would disable or break alerting
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.low_balance_threshold) {
            bail!(
                "low_balance_threshold must be between 0 and 1, got {}",
                self.low_balance_threshold
            );
        }
        if !(0..=MAX_EXPIRY_WARNING_DAYS).contains(&self.expiry_warning_days) {
            bail!(
                "expiry_warning_days must be between 0 and {}, got {}",
                MAX_EXPIRY_WARNING_DAYS,
                self.expiry_warning_days
            );
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }
}

//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use ustat_core::store::DEFAULT_FILE_NAME;
use ustat_core::warning::DEFAULT_COOLDOWN_MS;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the stats JSON file.
    pub stats_path: PathBuf,
    /// Directory probed for git state. Defaults to the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Quiet period before a selection change is evaluated.
    pub selection_debounce_ms: u64,
    /// Seconds between environment probes. `0` disables probing.
    pub probe_interval_secs: u64,
    /// Seconds between background saves. `0` saves only on shutdown.
    pub autosave_interval_secs: u64,
    /// Minimum gap between "not a repository" notices.
    pub git_warning_cooldown_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            stats_path: home.join(DEFAULT_FILE_NAME),
            workspace: None,
            selection_debounce_ms: 200,
            probe_interval_secs: 60,
            autosave_interval_secs: 300,
            git_warning_cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (USTAT_*)
        figment = figment.merge(Env::prefixed("USTAT_"));

        figment.extract()
    }

    pub const fn selection_debounce(&self) -> Duration {
        Duration::from_millis(self.selection_debounce_ms)
    }

    pub const fn probe_interval(&self) -> Option<Duration> {
        non_zero_secs(self.probe_interval_secs)
    }

    pub const fn autosave_interval(&self) -> Option<Duration> {
        non_zero_secs(self.autosave_interval_secs)
    }
}

const fn non_zero_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Returns the platform-specific config directory for ustat.
///
/// On Linux: `~/.config/ustat`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ustat"))
}

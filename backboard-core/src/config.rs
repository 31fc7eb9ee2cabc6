//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/backboard/config.toml`.
//!
//! Every tunable the scoring and clustering code depends on lives here with
//! an explicit serde default; there are no magic numbers buried in code
//! paths. Paths follow the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/backboard/` (~/.config/backboard/)
//! - Data: `$XDG_DATA_HOME/backboard/` (~/.local/share/backboard/)
//! - State/Logs: `$XDG_STATE_HOME/backboard/` (~/.local/state/backboard/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Struggle-score weights and cohort flagging threshold
    #[serde(default)]
    pub struggle: StruggleConfig,

    /// Cluster-assignment thresholds
    #[serde(default)]
    pub clusters: ClusterThresholds,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Weights for the per-concept struggle score and the threshold above
/// which a concept is flagged as "struggling" in cohort rollups.
#[derive(Debug, Clone, Deserialize)]
pub struct StruggleConfig {
    /// Weight on replay (rewind-into) counts
    #[serde(default = "default_weight")]
    pub replay_weight: f64,

    /// Weight on drop-off counts
    #[serde(default = "default_weight")]
    pub drop_off_weight: f64,

    /// Weight on the watch-time term (subtracted: more watching, less struggle)
    #[serde(default = "default_weight")]
    pub watch_time_weight: f64,

    /// Normalized score above which a concept counts as struggling
    #[serde(default = "default_struggle_threshold")]
    pub struggle_threshold: f64,
}

impl Default for StruggleConfig {
    fn default() -> Self {
        Self {
            replay_weight: default_weight(),
            drop_off_weight: default_weight(),
            watch_time_weight: default_weight(),
            struggle_threshold: default_struggle_threshold(),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_struggle_threshold() -> f64 {
    0.6
}

/// Thresholds for the ordered behavioral-cluster rule table.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterThresholds {
    /// Rewinds per lecture-minute watched above which a student is high-replay
    #[serde(default = "default_replay_rate")]
    pub replay_rate_threshold: f64,

    /// Start of the late-night window, hour of day (inclusive)
    #[serde(default = "default_late_night_start")]
    pub late_night_start_hour: u32,

    /// End of the late-night window, hour of day (exclusive); may wrap midnight
    #[serde(default = "default_late_night_end")]
    pub late_night_end_hour: u32,

    /// Note events per lecture-minute watched above which a student is a note-taker
    #[serde(default = "default_note_rate")]
    pub note_rate_threshold: f64,

    /// Margin above 1.0x playback speed for the fast-watcher rule
    #[serde(default = "default_speed_margin")]
    pub speed_margin: f64,
}

impl Default for ClusterThresholds {
    fn default() -> Self {
        Self {
            replay_rate_threshold: default_replay_rate(),
            late_night_start_hour: default_late_night_start(),
            late_night_end_hour: default_late_night_end(),
            note_rate_threshold: default_note_rate(),
            speed_margin: default_speed_margin(),
        }
    }
}

fn default_replay_rate() -> f64 {
    0.5
}

fn default_late_night_start() -> u32 {
    22
}

fn default_late_night_end() -> u32 {
    4
}

fn default_note_rate() -> f64 {
    0.2
}

fn default_speed_margin() -> f64 {
    0.25
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Sanity-check ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.clusters.late_night_start_hour > 23 || self.clusters.late_night_end_hour > 23 {
            return Err(Error::Config(
                "clusters.late_night_*_hour must be in 0..=23".to_string(),
            ));
        }
        if self.struggle.struggle_threshold < 0.0 || self.struggle.struggle_threshold > 1.0 {
            return Err(Error::Config(
                "struggle.struggle_threshold must be in [0, 1]".to_string(),
            ));
        }
        for (name, w) in [
            ("replay_weight", self.struggle.replay_weight),
            ("drop_off_weight", self.struggle.drop_off_weight),
            ("watch_time_weight", self.struggle.watch_time_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Config(format!(
                    "struggle.{} must be a non-negative finite number",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/backboard/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("backboard").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("backboard")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("backboard")
    }

    /// Returns the database file path
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("analytics.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("backboard.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Mainly for CLI binaries that want stable path behavior before
    /// invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

//! Lane configuration.
//!
//! Three-layer merge, lowest priority first:
//! 1. Built-in defaults ([`defaults`])
//! 2. Optional TOML file (`droid-lane.toml` or `--config` path)
//! 3. `DROID_LANE_*` environment variables
//!
//! Correctness does not depend on external tunability: the timeout and
//! watchdog constants have fixed defaults; capacity is always clamped into
//! `[1, 4]` after the merge.

mod defaults;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LaneError, LaneResult};

pub use defaults::{
    clamp_capacity, DEFAULT_ABSOLUTE_TIMEOUT_SECS, DEFAULT_CAPACITY,
    DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_TIMEOUT_CHECK_SECS, DEFAULT_WATCHDOG_PERIOD_SECS,
    MAX_CAPACITY, MIN_CAPACITY,
};

/// Effective lane configuration after the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Concurrent build slots, clamped into `[1, 4]`.
    pub capacity: usize,

    /// Absolute per-build wall-clock budget in seconds.
    pub absolute_timeout_secs: u64,

    /// Inactivity window in seconds (no observed progress).
    pub inactivity_timeout_secs: u64,

    /// Slot-watchdog tick period in seconds.
    pub watchdog_period_secs: u64,

    /// Supervisor timeout-check period in seconds.
    pub timeout_check_secs: u64,

    /// Root under which each build gets a fresh working directory.
    pub work_root: PathBuf,

    /// Shared directory where finished artifacts are published.
    pub output_dir: PathBuf,

    /// Directory for per-invocation build logs and summaries.
    pub log_dir: PathBuf,

    /// On-disk project template used by the templated pipeline, if any.
    pub template_dir: Option<PathBuf>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            absolute_timeout_secs: DEFAULT_ABSOLUTE_TIMEOUT_SECS,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
            watchdog_period_secs: DEFAULT_WATCHDOG_PERIOD_SECS,
            timeout_check_secs: DEFAULT_TIMEOUT_CHECK_SECS,
            work_root: PathBuf::from("var/work"),
            output_dir: PathBuf::from("var/out"),
            log_dir: PathBuf::from("var/logs"),
            template_dir: None,
        }
    }
}

/// File layer: every field optional so the file only overrides what it sets.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    capacity: Option<usize>,
    absolute_timeout_secs: Option<u64>,
    inactivity_timeout_secs: Option<u64>,
    watchdog_period_secs: Option<u64>,
    timeout_check_secs: Option<u64>,
    work_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    template_dir: Option<PathBuf>,
}

impl LaneConfig {
    /// Load configuration: defaults, then the TOML file (explicit path, or
    /// `droid-lane.toml` in the working directory when present), then
    /// `DROID_LANE_*` environment variables. Clamps and validates.
    pub fn load(path: Option<&Path>) -> LaneResult<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let implicit = PathBuf::from("droid-lane.toml");
                implicit.exists().then_some(implicit)
            }
        };
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file).map_err(|e| {
                LaneError::Config(format!("cannot read {}: {e}", file.display()))
            })?;
            let layer: FileConfig = toml::from_str(&text).map_err(|e| {
                LaneError::Config(format!("invalid {}: {e}", file.display()))
            })?;
            config.apply_file_layer(layer);
        }

        config.apply_env_layer();
        config.capacity = clamp_capacity(config.capacity);
        config.validate()?;
        Ok(config)
    }

    fn apply_file_layer(&mut self, layer: FileConfig) {
        if let Some(v) = layer.capacity {
            self.capacity = v;
        }
        if let Some(v) = layer.absolute_timeout_secs {
            self.absolute_timeout_secs = v;
        }
        if let Some(v) = layer.inactivity_timeout_secs {
            self.inactivity_timeout_secs = v;
        }
        if let Some(v) = layer.watchdog_period_secs {
            self.watchdog_period_secs = v;
        }
        if let Some(v) = layer.timeout_check_secs {
            self.timeout_check_secs = v;
        }
        if let Some(v) = layer.work_root {
            self.work_root = v;
        }
        if let Some(v) = layer.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = layer.log_dir {
            self.log_dir = v;
        }
        if layer.template_dir.is_some() {
            self.template_dir = layer.template_dir;
        }
    }

    fn apply_env_layer(&mut self) {
        if let Some(v) = env_usize("DROID_LANE_CAPACITY") {
            self.capacity = v;
        }
        if let Some(v) = env_u64("DROID_LANE_ABSOLUTE_TIMEOUT_SECS") {
            self.absolute_timeout_secs = v;
        }
        if let Some(v) = env_u64("DROID_LANE_INACTIVITY_TIMEOUT_SECS") {
            self.inactivity_timeout_secs = v;
        }
        if let Some(v) = env_path("DROID_LANE_WORK_ROOT") {
            self.work_root = v;
        }
        if let Some(v) = env_path("DROID_LANE_OUTPUT_DIR") {
            self.output_dir = v;
        }
        if let Some(v) = env_path("DROID_LANE_LOG_DIR") {
            self.log_dir = v;
        }
    }

    /// Bounds checks over the merged values.
    pub fn validate(&self) -> LaneResult<()> {
        if self.absolute_timeout_secs == 0 {
            return Err(LaneError::Config(
                "absolute_timeout_secs must be positive".to_string(),
            ));
        }
        if self.inactivity_timeout_secs == 0
            || self.inactivity_timeout_secs > self.absolute_timeout_secs
        {
            return Err(LaneError::Config(format!(
                "inactivity_timeout_secs must be in (0, {}], got {}",
                self.absolute_timeout_secs, self.inactivity_timeout_secs
            )));
        }
        if self.watchdog_period_secs == 0 || self.timeout_check_secs == 0 {
            return Err(LaneError::Config(
                "watchdog and timeout-check periods must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn absolute_timeout(&self) -> Duration {
        Duration::from_secs(self.absolute_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.watchdog_period_secs)
    }

    pub fn timeout_check(&self) -> Duration {
        Duration::from_secs(self.timeout_check_secs)
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LaneConfig::default();
        assert_eq!(config.capacity, 2);
        assert_eq!(config.absolute_timeout_secs, 2700);
        assert_eq!(config.inactivity_timeout_secs, 600);
        assert_eq!(config.watchdog_period_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_layer_overrides() {
        let mut config = LaneConfig::default();
        let layer: FileConfig = toml::from_str(
            r#"
capacity = 3
inactivity_timeout_secs = 120
work_root = "/tmp/lane-work"
"#,
        )
        .unwrap();
        config.apply_file_layer(layer);

        assert_eq!(config.capacity, 3);
        assert_eq!(config.inactivity_timeout_secs, 120);
        assert_eq!(config.work_root, PathBuf::from("/tmp/lane-work"));
        // Untouched fields keep their defaults.
        assert_eq!(config.absolute_timeout_secs, 2700);
    }

    #[test]
    fn test_capacity_clamp_applied_on_load() {
        let mut config = LaneConfig::default();
        config.capacity = 99;
        config.capacity = clamp_capacity(config.capacity);
        assert_eq!(config.capacity, 4);
    }

    #[test]
    fn test_validate_rejects_zero_absolute() {
        let mut config = LaneConfig::default();
        config.absolute_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inactivity_above_absolute() {
        let mut config = LaneConfig::default();
        config.absolute_timeout_secs = 100;
        config.inactivity_timeout_secs = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = LaneConfig::default();
        assert_eq!(config.absolute_timeout(), Duration::from_secs(2700));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(600));
    }
}

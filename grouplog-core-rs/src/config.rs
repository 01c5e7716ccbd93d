//! Logger configuration

use crate::level::LogLevel;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Prefix of the randomized directory the log file lives in
pub const DEFAULT_DIR_PREFIX: &str = "grouplog_";

/// Fixed log file name inside the randomized directory
pub const DEFAULT_FILE_NAME: &str = "log.txt";

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Root directory; a unique subdirectory is created below it
    pub root_dir: PathBuf,

    /// Prefix of the unique subdirectory name
    pub dir_prefix: String,

    /// File name inside the unique subdirectory
    pub file_name: String,

    /// Initial severity threshold
    pub level: LogLevel,

    /// Upper bound on each wait while draining end-of-transmission markers.
    /// `None` waits forever.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir(),
            dir_prefix: DEFAULT_DIR_PREFIX.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            level: LogLevel::None,
            shutdown_timeout: None,
        }
    }
}

impl LoggerConfig {
    /// Set the root directory
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Set the file name
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Set the initial threshold
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Bound the shutdown drain
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Generate the log file path: `<root>/<prefix><random>/<file>`.
    ///
    /// Every call yields a fresh directory name, so two loggers built from the
    /// same config never share a file.
    pub fn resolve_path(&self) -> PathBuf {
        let unique = Uuid::new_v4().simple().to_string()[..12].to_string();
        self.root_dir
            .join(format!("{}{}", self.dir_prefix, unique))
            .join(&self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LoggerConfig::default()
            .with_root_dir("/var/tmp")
            .with_file_name("run.log")
            .with_level(LogLevel::Warn)
            .with_shutdown_timeout(Duration::from_secs(2));

        assert_eq!(config.root_dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.file_name, "run.log");
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.shutdown_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_resolved_paths_are_unique() {
        let config = LoggerConfig::default();
        let a = config.resolve_path();
        let b = config.resolve_path();

        assert_ne!(a, b);
        assert_eq!(a.file_name().unwrap(), DEFAULT_FILE_NAME);
        assert!(a.starts_with(std::env::temp_dir()));

        let dir = a.parent().unwrap().file_name().unwrap().to_string_lossy().to_string();
        assert!(dir.starts_with(DEFAULT_DIR_PREFIX));
    }
}

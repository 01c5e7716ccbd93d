//! Severity levels and the suppression rule

use std::str::FromStr;

/// Log severity, ordered from least to most severe.
///
/// `None` doubles as the "emit nothing" threshold and as a no-op message level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LogLevel {
    #[default]
    None = 0,
    Info = 1,
    Warn = 2,
    Assert = 3,
    Error = 4,
    Exception = 5,
}

impl LogLevel {
    /// All levels in severity order
    pub const ALL: [LogLevel; 6] = [
        LogLevel::None,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Assert,
        LogLevel::Error,
        LogLevel::Exception,
    ];

    /// Tag written between the brackets of a log line.
    ///
    /// Returns `None` for levels that must never produce a line: `None` itself,
    /// and `Assert` in builds without debug assertions.
    pub fn name(self) -> Option<&'static str> {
        match self {
            LogLevel::None => None,
            LogLevel::Info => Some("info"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Assert if cfg!(debug_assertions) => Some("assert"),
            LogLevel::Assert => None,
            LogLevel::Error => Some("error"),
            LogLevel::Exception => Some("exception"),
        }
    }

    /// Whether this level bypasses the threshold entirely
    pub fn is_override(self) -> bool {
        match self {
            LogLevel::Exception => true,
            LogLevel::Assert => cfg!(debug_assertions),
            _ => false,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> LogLevel {
        match raw {
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Assert,
            4 => LogLevel::Error,
            5 => LogLevel::Exception,
            _ => LogLevel::None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::None => write!(f, "none"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Assert => write!(f, "assert"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Exception => write!(f, "exception"),
        }
    }
}

/// Error returned when a level name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LogLevel::None),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "assert" => Ok(LogLevel::Assert),
            "error" => Ok(LogLevel::Error),
            "exception" => Ok(LogLevel::Exception),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// Decide whether a message at `level` passes the `threshold`.
///
/// Override levels always pass. Otherwise both must be non-`None` and the
/// message must be at least as severe as the threshold.
pub fn should_emit(threshold: LogLevel, level: LogLevel) -> bool {
    if level.is_override() {
        return true;
    }
    threshold != LogLevel::None && level != LogLevel::None && level >= threshold
}

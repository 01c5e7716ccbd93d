//! Logger handle: severity filter, line formatting and group routing

use crate::config::LoggerConfig;
use crate::error::LogError;
use crate::group::{Aggregator, ListenerState};
use crate::level::{should_emit, LogLevel};
use crate::sink::FileSink;
use crate::transport::{Communicator, Rank, LOG_TAG, OWNER_RANK};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where a line was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Standalone process, no group
    Local,
    /// Member of a process group
    Process(Rank),
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Process(rank) => write!(f, "process {}", rank),
        }
    }
}

/// Format `"<origin> - [<levelname>] <value>"`.
///
/// Returns `None` for levels without a name; such messages produce no line.
pub fn format_line(origin: Origin, level: LogLevel, value: impl Display) -> Option<String> {
    level
        .name()
        .map(|name| format!("{} - [{}] {}", origin, name, value))
}

/// Process logger.
///
/// Owns the log file and the group aggregator. Share it as `Arc<Logger>`;
/// every method takes `&self`.
pub struct Logger {
    sink: Arc<FileSink>,
    threshold: AtomicU8,
    aggregator: Aggregator,
}

impl Logger {
    /// Create a logger writing below a freshly generated unique directory
    pub fn new(config: &LoggerConfig) -> Self {
        let path = config.resolve_path();
        debug!("Logger: log file will be {:?}", path);

        Self {
            sink: Arc::new(FileSink::new(path)),
            threshold: AtomicU8::new(config.level as u8),
            aggregator: Aggregator::new(config.shutdown_timeout),
        }
    }

    /// Create a logger writing to an explicit path
    pub fn with_path(path: impl Into<PathBuf>, level: LogLevel) -> Self {
        Self {
            sink: Arc::new(FileSink::new(path)),
            threshold: AtomicU8::new(level as u8),
            aggregator: Aggregator::new(None),
        }
    }

    /// Bound the shutdown drain; see [`LoggerConfig::shutdown_timeout`]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.aggregator = Aggregator::new(Some(timeout));
        self
    }

    /// Resolved log file path
    pub fn filename(&self) -> &Path {
        self.sink.path()
    }

    /// Change the severity threshold
    pub fn set_level(&self, level: LogLevel) {
        self.threshold.store(level as u8, Ordering::Relaxed);
    }

    /// Current severity threshold
    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.threshold.load(Ordering::Relaxed))
    }

    /// Whether a message at `level` would currently be written
    pub fn enabled(&self, level: LogLevel) -> bool {
        should_emit(self.level(), level)
    }

    /// Write a message to this process's log file
    pub fn write(&self, level: LogLevel, value: impl Display) -> Result<(), LogError> {
        if !self.enabled(level) {
            return Ok(());
        }
        match format_line(Origin::Local, level, value) {
            Some(line) => self.sink.append(&line),
            None => Ok(()),
        }
    }

    /// Write a message through the group.
    ///
    /// Rank 0 appends to its own file; other ranks send the line to rank 0.
    /// In a group of one this is identical to [`Logger::write`].
    pub fn write_group<C>(&self, comm: &C, level: LogLevel, value: impl Display) -> Result<(), LogError>
    where
        C: Communicator + ?Sized,
    {
        if comm.size() <= 1 {
            return self.write(level, value);
        }
        if !self.enabled(level) {
            return Ok(());
        }

        let rank = comm.rank();
        let Some(line) = format_line(Origin::Process(rank), level, value) else {
            return Ok(());
        };

        if rank == OWNER_RANK {
            self.sink.append(&line)
        } else {
            comm.send(OWNER_RANK, LOG_TAG, line)?;
            Ok(())
        }
    }

    /// Start group aggregation. Collective: every rank must call it.
    pub async fn start_listener<C>(&self, comm: &Arc<C>) -> Result<(), LogError>
    where
        C: Communicator + ?Sized,
    {
        self.aggregator.start(comm, &self.sink).await
    }

    /// Finish group aggregation. Collective: every rank must call it.
    ///
    /// On rank 0 this returns once every other rank's lines have been
    /// written. Without a configured shutdown timeout, a rank that never
    /// calls shutdown keeps rank 0 waiting indefinitely.
    pub async fn shutdown_listener<C>(&self, comm: &Arc<C>) -> Result<(), LogError>
    where
        C: Communicator + ?Sized,
    {
        self.aggregator.shutdown(comm, &self.sink).await
    }

    /// Current aggregator state
    pub fn listener_state(&self) -> ListenerState {
        self.aggregator.state()
    }

    /// Close the log file handle
    pub fn close(&self) {
        self.sink.close();
    }
}

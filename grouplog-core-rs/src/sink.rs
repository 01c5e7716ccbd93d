//! Append-only log file shared by every writer in the process.
//!
//! The file is opened lazily on the first non-empty append and stays open
//! until the sink is closed. One mutex guards the handle, so lines from
//! concurrent writers never interleave.

use crate::error::LogError;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

enum SinkState {
    /// Not opened yet
    Pending,
    /// Open for appending
    Open(File),
    /// Open failed; never retried
    Broken,
    /// Closed by the owner
    Closed,
}

/// Mutex-guarded, lazily opened log file
pub struct FileSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

impl FileSink {
    /// Create a sink for `path` without touching the filesystem
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(SinkState::Pending),
        }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file handle is currently open
    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Open(_))
    }

    /// Append one line followed by a newline and flush.
    ///
    /// Empty lines are ignored without taking the lock.
    pub fn append(&self, line: &str) -> Result<(), LogError> {
        if line.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();

        if let SinkState::Pending = *state {
            match self.open() {
                Ok(file) => *state = SinkState::Open(file),
                Err(e) => {
                    error!("Sink: cannot open {:?}: {}", self.path, e);
                    *state = SinkState::Broken;
                    return Err(e);
                }
            }
        }

        match &mut *state {
            SinkState::Open(file) => {
                writeln!(file, "{}", line)?;
                file.flush()?;
                Ok(())
            }
            SinkState::Broken | SinkState::Closed => Err(LogError::SinkBroken(self.path.clone())),
            SinkState::Pending => unreachable!("sink opened above"),
        }
    }

    /// Drop the file handle. Later appends fail; closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let SinkState::Open(file) = std::mem::replace(&mut *state, SinkState::Closed) {
            drop(file);
            debug!("Sink: closed {:?}", self.path);
        }
    }

    fn open(&self) -> Result<File, LogError> {
        let open_err = |source| LogError::Open {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                fs::create_dir_all(dir).map_err(open_err)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(open_err)?;

        debug!("Sink: opened {:?}", self.path);
        Ok(file)
    }
}

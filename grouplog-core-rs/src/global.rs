//! Process-wide logger instance with an explicit lifecycle.
//!
//! Prefer passing an `Arc<Logger>` to collaborators. This module exists for
//! code that cannot thread a handle through: create the instance once at the
//! top of `main`, release it once before returning. Misuse is a programming
//! error and panics.

use crate::config::LoggerConfig;
use crate::logger::Logger;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

static INSTANCE: RwLock<Option<Arc<Logger>>> = parking_lot::const_rwlock(None);

/// Create the process logger with default settings
pub fn create_instance() {
    create_instance_with(&LoggerConfig::default());
}

/// Create the process logger.
///
/// # Panics
/// If an instance already exists.
pub fn create_instance_with(config: &LoggerConfig) {
    let mut slot = INSTANCE.write();
    assert!(slot.is_none(), "logger instance already created");
    let logger = Logger::new(config);
    debug!("Logger: global instance created at {:?}", logger.filename());
    *slot = Some(Arc::new(logger));
}

/// Close the log file and drop the process logger.
///
/// # Panics
/// If no instance exists, including a second release.
pub fn release_instance() {
    let logger = INSTANCE.write().take();
    let logger = logger.expect("logger instance released without being created");
    logger.close();
    debug!("Logger: global instance released");
}

/// Whether the process logger currently exists
pub fn exists() -> bool {
    INSTANCE.read().is_some()
}

/// The process logger.
///
/// # Panics
/// If called before [`create_instance`] or after [`release_instance`].
pub fn instance() -> Arc<Logger> {
    INSTANCE
        .read()
        .clone()
        .expect("logger instance used before creation")
}

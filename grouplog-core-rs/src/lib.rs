//! grouplog core library
//!
//! File logger for single processes and for groups of cooperating processes.
//! Lines are filtered by severity and appended to one file per process; in a
//! group, rank 0 owns the file and every other rank ships its lines to it.
//! Shutdown runs an end-of-transmission handshake so no line in flight is lost.

pub mod level;
pub mod config;
pub mod error;
pub mod sink;
pub mod logger;
pub mod group;
pub mod transport;
pub mod local;
pub mod tcp;
pub mod global;

pub use level::{should_emit, LogLevel};
pub use config::LoggerConfig;
pub use error::{LogError, TransportError};
pub use sink::FileSink;
pub use logger::{format_line, Logger, Origin};
pub use group::ListenerState;
pub use transport::{Communicator, Envelope, Frame, Rank, Tag, EOT, LOG_TAG, OWNER_RANK};
pub use local::LocalCommunicator;
pub use tcp::TcpCommunicator;

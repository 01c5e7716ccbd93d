//! Error types for the logger and its communicators

use crate::transport::Rank;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the logger
#[derive(Error, Debug)]
pub enum LogError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write to log file failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("log sink {0} is unavailable after a failed open")]
    SinkBroken(PathBuf),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("shutdown timed out with {outstanding} end-of-transmission markers outstanding")]
    ShutdownTimeout { outstanding: usize },

    #[error("listener task failed: {0}")]
    ListenerJoin(String),
}

/// Errors from the message-passing layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("channel closed")]
    Closed,

    #[error("no route to rank {0}")]
    UnknownPeer(Rank),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

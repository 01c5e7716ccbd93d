//! Message-passing abstraction used by the group aggregator

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Position of a process within its group, `0..size`
pub type Rank = usize;

/// Message tag
pub type Tag = u32;

/// Rank that owns the log file
pub const OWNER_RANK: Rank = 0;

/// Tag of the dedicated logging channel
pub const LOG_TAG: Tag = 999;

/// Sentinel text meaning "this sender will send no more lines"
pub const EOT: &str = "$EOT$";

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub text: String,
}

impl Envelope {
    /// Whether this is the end-of-transmission sentinel
    pub fn is_eot(&self) -> bool {
        self.text == EOT
    }
}

/// Wire frames exchanged between group members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// First frame on a new connection
    #[serde(rename = "HELLO")]
    Hello { rank: Rank },

    /// Tagged text payload
    #[serde(rename = "LINE")]
    Line { source: Rank, tag: Tag, text: String },

    /// Rank has reached barrier `epoch`
    #[serde(rename = "BARRIER")]
    Barrier { rank: Rank, epoch: u64 },

    /// Everyone reached barrier `epoch`
    #[serde(rename = "RELEASE")]
    Release { epoch: u64 },
}

impl Frame {
    /// Serialize frame to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize frame from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One member's view of a process group.
///
/// Delivery from a single sender to a single receiver must preserve send
/// order; the shutdown handshake relies on it.
#[async_trait]
pub trait Communicator: Send + Sync + 'static {
    /// This process's rank
    fn rank(&self) -> Rank;

    /// Number of processes in the group
    fn size(&self) -> usize;

    /// Queue `text` for delivery to `dest`. Never waits for delivery.
    fn send(&self, dest: Rank, tag: Tag, text: String) -> Result<(), TransportError>;

    /// Wait for the next message carrying `tag`. Must be cancellation safe:
    /// dropping the future loses no message.
    async fn recv(&self, tag: Tag) -> Result<Envelope, TransportError>;

    /// Wait until every member of the group has entered the barrier
    async fn barrier(&self) -> Result<(), TransportError>;
}

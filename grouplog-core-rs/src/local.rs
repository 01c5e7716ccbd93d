//! In-process group over tokio channels.
//!
//! Every member gets an unbounded inbox and a handle to everyone else's, so
//! a group of "processes" can run as tasks inside one runtime.

use crate::error::TransportError;
use crate::transport::{Communicator, Envelope, Rank, Tag};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Barrier, Mutex};

struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    /// Messages received while waiting for a different tag
    stash: VecDeque<Envelope>,
}

/// One member of an in-process group
pub struct LocalCommunicator {
    rank: Rank,
    peers: Vec<mpsc::UnboundedSender<Envelope>>,
    inbox: Mutex<Inbox>,
    barrier: Arc<Barrier>,
}

impl LocalCommunicator {
    /// Build a connected group of `size` members, indexed by rank
    pub fn group(size: usize) -> Vec<Arc<LocalCommunicator>> {
        assert!(size > 0, "a group needs at least one member");

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        let barrier = Arc::new(Barrier::new(size));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| {
                Arc::new(LocalCommunicator {
                    rank,
                    peers: senders.clone(),
                    inbox: Mutex::new(Inbox {
                        rx,
                        stash: VecDeque::new(),
                    }),
                    barrier: barrier.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Communicator for LocalCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: Rank, tag: Tag, text: String) -> Result<(), TransportError> {
        let peer = self.peers.get(dest).ok_or(TransportError::UnknownPeer(dest))?;
        peer.send(Envelope {
            source: self.rank,
            tag,
            text,
        })
        .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self, tag: Tag) -> Result<Envelope, TransportError> {
        let mut inbox = self.inbox.lock().await;

        if let Some(pos) = inbox.stash.iter().position(|e| e.tag == tag) {
            if let Some(env) = inbox.stash.remove(pos) {
                return Ok(env);
            }
        }

        loop {
            let env = inbox.rx.recv().await.ok_or(TransportError::Closed)?;
            if env.tag == tag {
                return Ok(env);
            }
            inbox.stash.push_back(env);
        }
    }

    async fn barrier(&self) -> Result<(), TransportError> {
        self.barrier.wait().await;
        Ok(())
    }
}

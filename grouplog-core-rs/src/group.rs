//! Group aggregation: every rank's lines end up in rank 0's file.
//!
//! Rank 0 runs a listener task that forwards lines arriving on the logging
//! tag to its sink. Shutdown is a collective handshake: each non-zero rank
//! sends one end-of-transmission marker after its last line, and rank 0
//! keeps draining until it has counted `size - 1` markers. Because delivery
//! from one sender is FIFO, every line a sender wrote before its marker has
//! been forwarded by then.

use crate::error::LogError;
use crate::sink::FileSink;
use crate::transport::{Communicator, Envelope, EOT, LOG_TAG, OWNER_RANK};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lifecycle of the aggregator on one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

struct ListenerHandle {
    cancel: watch::Sender<bool>,
    /// Resolves to the number of EOT markers seen before cancellation
    task: JoinHandle<usize>,
}

pub(crate) struct Aggregator {
    state: Mutex<ListenerState>,
    /// Serializes concurrent start attempts
    start_lock: tokio::sync::Mutex<()>,
    /// Serializes the termination handshake; distinct from `start_lock`
    finalize_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<ListenerHandle>>,
    shutdown_timeout: Option<Duration>,
}

impl Aggregator {
    pub(crate) fn new(shutdown_timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(ListenerState::NotStarted),
            start_lock: tokio::sync::Mutex::new(()),
            finalize_lock: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
            shutdown_timeout,
        }
    }

    pub(crate) fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    pub(crate) async fn start<C>(&self, comm: &Arc<C>, sink: &Arc<FileSink>) -> Result<(), LogError>
    where
        C: Communicator + ?Sized,
    {
        if comm.size() <= 1 || self.state() == ListenerState::Running {
            return Ok(());
        }

        let _guard = self.start_lock.lock().await;
        {
            let mut state = self.state.lock();
            if *state == ListenerState::Running {
                return Ok(());
            }
            *state = ListenerState::Running;
        }

        if comm.rank() == OWNER_RANK {
            let (cancel, cancelled) = watch::channel(false);
            let task = tokio::spawn(listen(comm.clone(), sink.clone(), cancelled));
            *self.listener.lock() = Some(ListenerHandle { cancel, task });
            info!("Group: listener started for {} ranks", comm.size());
        }

        comm.barrier().await?;
        debug!("Group: rank {} running", comm.rank());
        Ok(())
    }

    pub(crate) async fn shutdown<C>(&self, comm: &Arc<C>, sink: &Arc<FileSink>) -> Result<(), LogError>
    where
        C: Communicator + ?Sized,
    {
        {
            let mut state = self.state.lock();
            if *state != ListenerState::Running {
                return Ok(());
            }
            *state = ListenerState::ShuttingDown;
        }

        let _guard = self.finalize_lock.lock().await;

        let handshake = if comm.rank() == OWNER_RANK {
            self.drain(comm.as_ref(), sink).await
        } else {
            comm.send(OWNER_RANK, LOG_TAG, EOT.to_string())
                .map_err(LogError::from)
        };

        // A failed handshake leaves peers waiting; entering the barrier would hang too
        if let Err(e) = handshake {
            *self.state.lock() = ListenerState::Stopped;
            return Err(e);
        }

        let barrier = comm.barrier().await;
        *self.state.lock() = ListenerState::Stopped;
        barrier?;

        debug!("Group: rank {} stopped", comm.rank());
        Ok(())
    }

    /// Stop the listener and keep forwarding until every peer's EOT is counted
    async fn drain<C>(&self, comm: &C, sink: &FileSink) -> Result<(), LogError>
    where
        C: Communicator + ?Sized,
    {
        let mut outstanding = comm.size() - 1;

        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            let _ = handle.cancel.send(true);
            let seen = handle
                .task
                .await
                .map_err(|e| LogError::ListenerJoin(e.to_string()))?;
            outstanding = outstanding.saturating_sub(seen);
        }

        while outstanding > 0 {
            let received = match self.shutdown_timeout {
                Some(limit) => tokio::time::timeout(limit, comm.recv(LOG_TAG))
                    .await
                    .map_err(|_| LogError::ShutdownTimeout { outstanding })?,
                None => comm.recv(LOG_TAG).await,
            }?;

            if received.is_eot() {
                outstanding -= 1;
                debug!("Group: EOT from rank {}, {} outstanding", received.source, outstanding);
            } else {
                forward(sink, &received);
            }
        }

        info!("Group: all ranks drained");
        Ok(())
    }
}

/// Rank 0 listener loop; returns the number of EOT markers it consumed
async fn listen<C>(comm: Arc<C>, sink: Arc<FileSink>, mut cancelled: watch::Receiver<bool>) -> usize
where
    C: Communicator + ?Sized,
{
    let mut eot_seen = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancelled.changed() => break,

            received = comm.recv(LOG_TAG) => match received {
                Ok(env) if env.is_eot() => {
                    eot_seen += 1;
                    debug!("Group: early EOT from rank {}", env.source);
                }
                Ok(env) => forward(&sink, &env),
                Err(e) => {
                    error!("Group: listener receive failed: {}", e);
                    break;
                }
            },
        }
    }

    eot_seen
}

/// Append a peer's line verbatim. Sink errors are reported, not propagated,
/// so EOT accounting continues.
fn forward(sink: &FileSink, env: &Envelope) {
    if let Err(e) = sink.append(&env.text) {
        error!("Group: dropping line from rank {}: {}", env.source, e);
    }
}

//! TCP communicator for groups spanning several OS processes.
//!
//! Star topology: rank 0 listens, every other rank opens one connection to
//! it and introduces itself with a `HELLO` frame. Frames are newline
//! delimited JSON. A single connection per peer keeps per-sender FIFO.
//! Barriers are coordinated by rank 0.

use crate::error::TransportError;
use crate::transport::{Communicator, Envelope, Frame, Rank, Tag, OWNER_RANK};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Connection attempts made by a non-zero rank before giving up
const CONNECT_ATTEMPTS: u32 = 50;

/// Delay between connection attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    stash: VecDeque<Envelope>,
}

/// Work queued for a connection's writer task
enum Outgoing {
    Frame(Frame),
    /// Acknowledged once everything queued before it is on the socket
    Flush(oneshot::Sender<()>),
}

/// Group member connected over TCP
pub struct TcpCommunicator {
    rank: Rank,
    size: usize,
    /// Writer queues keyed by destination rank
    outbound: HashMap<Rank, mpsc::UnboundedSender<Outgoing>>,
    /// Loopback for messages a rank sends to itself
    loopback: mpsc::UnboundedSender<Envelope>,
    inbox: Mutex<Inbox>,
    barrier_rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    epoch: AtomicU64,
    local_addr: SocketAddr,
}

impl TcpCommunicator {
    /// Bind `addr` as rank 0 and wait until all `size - 1` peers have connected
    pub async fn bind(addr: SocketAddr, size: usize) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Self::accept(listener, size).await
    }

    /// Act as rank 0 on an already bound listener
    pub async fn accept(listener: TcpListener, size: usize) -> Result<Self, TransportError> {
        let local_addr = listener.local_addr()?;
        let (loopback, inbox_rx) = mpsc::unbounded_channel();
        let (barrier_tx, barrier_rx) = mpsc::unbounded_channel();
        let mut outbound = HashMap::new();
        let mut seen = HashSet::new();

        info!("TCP: rank 0 waiting for {} peers on {}", size.saturating_sub(1), local_addr);

        while seen.len() + 1 < size {
            let (stream, peer_addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let (read_half, write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let first = lines
                .next_line()
                .await?
                .ok_or_else(|| TransportError::Handshake(format!("{} closed before HELLO", peer_addr)))?;
            let rank = match Frame::from_bytes(first.as_bytes())? {
                Frame::Hello { rank } => rank,
                other => {
                    return Err(TransportError::Handshake(format!(
                        "expected HELLO from {}, got {:?}",
                        peer_addr, other
                    )))
                }
            };
            if rank == OWNER_RANK || rank >= size || !seen.insert(rank) {
                return Err(TransportError::Handshake(format!(
                    "invalid or duplicate rank {} from {}",
                    rank, peer_addr
                )));
            }

            debug!("TCP: rank {} connected from {}", rank, peer_addr);
            outbound.insert(rank, spawn_writer(write_half, rank));
            spawn_reader(lines, rank, loopback.clone(), barrier_tx.clone());
        }

        info!("TCP: group of {} complete", size);

        Ok(Self {
            rank: OWNER_RANK,
            size,
            outbound,
            loopback,
            inbox: Mutex::new(Inbox {
                rx: inbox_rx,
                stash: VecDeque::new(),
            }),
            barrier_rx: Mutex::new(barrier_rx),
            epoch: AtomicU64::new(0),
            local_addr,
        })
    }

    /// Join the group as `rank` by connecting to rank 0 at `addr`
    pub async fn connect(addr: SocketAddr, rank: Rank, size: usize) -> Result<Self, TransportError> {
        if rank == OWNER_RANK || rank >= size {
            return Err(TransportError::Handshake(format!(
                "rank {} cannot connect to a group of {}",
                rank, size
            )));
        }

        let stream = connect_with_retry(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (loopback, inbox_rx) = mpsc::unbounded_channel();
        let (barrier_tx, barrier_rx) = mpsc::unbounded_channel();

        let writer = spawn_writer(write_half, OWNER_RANK);
        writer
            .send(Outgoing::Frame(Frame::Hello { rank }))
            .map_err(|_| TransportError::Closed)?;
        spawn_reader(BufReader::new(read_half).lines(), OWNER_RANK, loopback.clone(), barrier_tx);

        info!("TCP: rank {} connected to {}", rank, addr);

        let mut outbound = HashMap::new();
        outbound.insert(OWNER_RANK, writer);

        Ok(Self {
            rank,
            size,
            outbound,
            loopback,
            inbox: Mutex::new(Inbox {
                rx: inbox_rx,
                stash: VecDeque::new(),
            }),
            barrier_rx: Mutex::new(barrier_rx),
            epoch: AtomicU64::new(0),
            local_addr,
        })
    }

    /// Address of the local end (the listening address on rank 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn send_frame(&self, dest: Rank, frame: Frame) -> Result<(), TransportError> {
        let writer = self.outbound.get(&dest).ok_or(TransportError::UnknownPeer(dest))?;
        writer
            .send(Outgoing::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Wait until every frame queued so far has been written to its socket
    pub async fn flush(&self) -> Result<(), TransportError> {
        for writer in self.outbound.values() {
            let (ack, done) = oneshot::channel();
            writer
                .send(Outgoing::Flush(ack))
                .map_err(|_| TransportError::Closed)?;
            done.await.map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    async fn next_barrier_frame(&self) -> Result<Frame, TransportError> {
        self.barrier_rx.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Communicator for TcpCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: Rank, tag: Tag, text: String) -> Result<(), TransportError> {
        if dest == self.rank {
            return self
                .loopback
                .send(Envelope {
                    source: self.rank,
                    tag,
                    text,
                })
                .map_err(|_| TransportError::Closed);
        }
        self.send_frame(
            dest,
            Frame::Line {
                source: self.rank,
                tag,
                text,
            },
        )
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
        if self.size <= 1 {
            return Ok(());
        }

        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);

        if self.rank == OWNER_RANK {
            let mut arrived = HashSet::new();
            while arrived.len() + 1 < self.size {
                match self.next_barrier_frame().await? {
                    Frame::Barrier { rank, epoch: e } if e == epoch => {
                        arrived.insert(rank);
                    }
                    other => warn!("TCP: unexpected frame during barrier {}: {:?}", epoch, other),
                }
            }
            for &peer in self.outbound.keys() {
                self.send_frame(peer, Frame::Release { epoch })?;
            }
            // Rank 0 may exit right after the last barrier
            self.flush().await?;
        } else {
            self.send_frame(OWNER_RANK, Frame::Barrier { rank: self.rank, epoch })?;
            loop {
                match self.next_barrier_frame().await? {
                    Frame::Release { epoch: e } if e == epoch => break,
                    other => warn!("TCP: unexpected frame during barrier {}: {:?}", epoch, other),
                }
            }
        }

        debug!("TCP: rank {} passed barrier {}", self.rank, epoch);
        Ok(())
    }
}

async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream, TransportError> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!("TCP: connect to {} failed (attempt {}): {}", addr, attempt, e);
                attempt += 1;
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Drain a frame queue onto the socket, one JSON document per line
fn spawn_writer(mut write_half: OwnedWriteHalf, peer: Rank) -> mpsc::UnboundedSender<Outgoing> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            let frame = match outgoing {
                Outgoing::Frame(frame) => frame,
                Outgoing::Flush(ack) => {
                    let _ = write_half.flush().await;
                    let _ = ack.send(());
                    continue;
                }
            };
            let mut bytes = match frame.to_bytes() {
                Ok(b) => b,
                Err(e) => {
                    error!("TCP: cannot encode frame for rank {}: {}", peer, e);
                    continue;
                }
            };
            bytes.push(b'\n');

            if let Err(e) = write_half.write_all(&bytes).await {
                error!("TCP: write to rank {} failed: {}", peer, e);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    tx
}

/// Route incoming frames: lines to the inbox, barrier traffic to the barrier queue
fn spawn_reader(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    peer: Rank,
    inbox: mpsc::UnboundedSender<Envelope>,
    barrier: mpsc::UnboundedSender<Frame>,
) {
    tokio::spawn(async move {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("TCP: rank {} closed its connection", peer);
                    break;
                }
                Err(e) => {
                    error!("TCP: read from rank {} failed: {}", peer, e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match Frame::from_bytes(line.as_bytes()) {
                Ok(Frame::Line { source, tag, text }) => {
                    if inbox.send(Envelope { source, tag, text }).is_err() {
                        break;
                    }
                }
                Ok(frame @ (Frame::Barrier { .. } | Frame::Release { .. })) => {
                    if barrier.send(frame).is_err() {
                        break;
                    }
                }
                Ok(Frame::Hello { rank }) => {
                    warn!("TCP: repeated HELLO from rank {} ignored", rank);
                }
                Err(e) => {
                    warn!("TCP: failed to parse frame from rank {}: {}", peer, e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn tcp_group(size: usize) -> Vec<Arc<TcpCommunicator>> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let owner = tokio::spawn(TcpCommunicator::accept(listener, size));
        let mut peers = Vec::new();
        for rank in 1..size {
            peers.push(TcpCommunicator::connect(addr, rank, size).await.unwrap());
        }

        let mut group = vec![Arc::new(owner.await.unwrap().unwrap())];
        group.extend(peers.into_iter().map(Arc::new));
        group
    }

    #[tokio::test]
    async fn test_lines_reach_owner_in_order() {
        let group = tcp_group(3).await;

        for i in 0..20 {
            group[1].send(0, 5, format!("one {}", i)).unwrap();
            group[2].send(0, 5, format!("two {}", i)).unwrap();
        }

        let mut one = Vec::new();
        let mut two = Vec::new();
        for _ in 0..40 {
            let env = group[0].recv(5).await.unwrap();
            if env.source == 1 {
                one.push(env.text);
            } else {
                two.push(env.text);
            }
        }

        assert_eq!(one, (0..20).map(|i| format!("one {}", i)).collect::<Vec<_>>());
        assert_eq!(two, (0..20).map(|i| format!("two {}", i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_barrier_round_trips() {
        let group = tcp_group(3).await;

        for _ in 0..3 {
            let handles: Vec<_> = group
                .iter()
                .cloned()
                .map(|c| tokio::spawn(async move { c.barrier().await }))
                .collect();
            for h in handles {
                h.await.unwrap().unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_star_topology_routes() {
        let group = tcp_group(3).await;

        assert!(matches!(
            group[1].send(2, 5, "x".to_string()),
            Err(TransportError::UnknownPeer(2))
        ));

        group[0].send(0, 5, "self".to_string()).unwrap();
        assert_eq!(group[0].recv(5).await.unwrap().text, "self");
    }

    #[tokio::test]
    async fn test_rank_zero_cannot_connect() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(matches!(
            TcpCommunicator::connect(addr, 0, 2).await,
            Err(TransportError::Handshake(_))
        ));
    }
}

//! Group aggregation across TCP connections

use grouplog_core::{Communicator, ListenerState, LogError, LogLevel, Logger, TcpCommunicator};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::net::TcpListener;

async fn tcp_group(size: usize) -> Vec<Arc<TcpCommunicator>> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let owner = tokio::spawn(TcpCommunicator::accept(listener, size));
    let mut comms = Vec::new();
    for rank in 1..size {
        comms.push(Arc::new(TcpCommunicator::connect(addr, rank, size).await.unwrap()));
    }
    comms.insert(0, Arc::new(owner.await.unwrap().unwrap()));
    comms
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_group_aggregates_into_rank_zero() {
    const SIZE: usize = 3;
    const PER_RANK: usize = 40;

    let dir = tempdir().unwrap();
    let comms = tcp_group(SIZE).await;

    let logs: Vec<_> = (0..SIZE)
        .map(|rank| {
            Arc::new(Logger::with_path(
                dir.path().join(format!("rank{}", rank)).join("log.txt"),
                LogLevel::Info,
            ))
        })
        .collect();

    let tasks: Vec<_> = comms
        .iter()
        .cloned()
        .zip(logs.iter().cloned())
        .map(|(comm, logger)| {
            tokio::spawn(async move {
                logger.start_listener(&comm).await?;
                for i in 0..PER_RANK {
                    logger.write_group(comm.as_ref(), LogLevel::Warn, format!("line {}", i))?;
                }
                logger.shutdown_listener(&comm).await?;
                Ok::<_, LogError>(())
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let content = fs::read_to_string(logs[0].filename()).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), SIZE * PER_RANK);

    for rank in 0..SIZE {
        let prefix = format!("process {} - [warn] line ", rank);
        let seq: Vec<usize> = lines
            .iter()
            .filter_map(|l| l.strip_prefix(prefix.as_str()))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(seq, (0..PER_RANK).collect::<Vec<_>>());
    }

    assert!(!logs[1].filename().exists());
    assert!(!logs[2].filename().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_restart_after_stop() {
    const SIZE: usize = 3;
    const ROUNDS: usize = 3;

    let dir = tempdir().unwrap();
    let comms = tcp_group(SIZE).await;
    let logs: Vec<_> = (0..SIZE)
        .map(|rank| {
            Arc::new(Logger::with_path(
                dir.path().join(format!("rank{}", rank)).join("log.txt"),
                LogLevel::Info,
            ))
        })
        .collect();

    let tasks: Vec<_> = comms
        .iter()
        .cloned()
        .zip(logs.iter().cloned())
        .map(|(comm, logger)| {
            tokio::spawn(async move {
                for round in 0..ROUNDS {
                    logger.start_listener(&comm).await?;
                    logger.write_group(comm.as_ref(), LogLevel::Info, format!("round {}", round))?;
                    logger.shutdown_listener(&comm).await?;
                    assert_eq!(logger.listener_state(), ListenerState::Stopped);
                }
                Ok::<_, LogError>(())
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let content = fs::read_to_string(logs[0].filename()).unwrap();
    assert_eq!(content.lines().count(), SIZE * ROUNDS);
    for round in 0..ROUNDS {
        let suffix = format!("[info] round {}", round);
        assert_eq!(content.lines().filter(|l| l.ends_with(&suffix)).count(), SIZE);
    }
}

//! grouplog node
//!
//! Runs one rank of a TCP logging group. Rank 0 listens and owns the log
//! file; every other rank connects to it, writes its lines through the group
//! and takes part in the collective shutdown.

use clap::Parser;
use grouplog_core::{Communicator, LogLevel, Logger, LoggerConfig, TcpCommunicator, OWNER_RANK};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// One member of a grouplog logging group
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rank of this process (0 owns the log file)
    #[arg(short, long)]
    rank: usize,

    /// Number of processes in the group
    #[arg(short, long, default_value = "1")]
    size: usize,

    /// Address rank 0 listens on
    #[arg(short, long, default_value = "127.0.0.1:9990")]
    addr: SocketAddr,

    /// Severity threshold for the group log (none, info, warn, assert, error, exception)
    #[arg(long, default_value = "info")]
    level: LogLevel,

    /// Number of lines this rank writes
    #[arg(short, long, default_value = "10")]
    messages: usize,

    /// Root directory for the log file (defaults to the system temp dir)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Give up draining after this many milliseconds without a message
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    /// Diagnostic output level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Cycle through the emitting levels so the file shows each tag
fn level_for(i: usize) -> LogLevel {
    match i % 3 {
        0 => LogLevel::Info,
        1 => LogLevel::Warn,
        _ => LogLevel::Error,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.rank >= args.size {
        return Err(format!("rank {} outside group of {}", args.rank, args.size).into());
    }

    let mut config = LoggerConfig::default().with_level(args.level);
    if let Some(dir) = args.log_dir {
        config = config.with_root_dir(dir);
    }
    if let Some(ms) = args.shutdown_timeout_ms {
        config = config.with_shutdown_timeout(Duration::from_millis(ms));
    }
    let logger = Arc::new(Logger::new(&config));

    info!("grouplog node rank {}/{} starting", args.rank, args.size);

    let comm = if args.rank == OWNER_RANK {
        Arc::new(TcpCommunicator::bind(args.addr, args.size).await?)
    } else {
        Arc::new(TcpCommunicator::connect(args.addr, args.rank, args.size).await?)
    };

    logger.start_listener(&comm).await?;

    for i in 0..args.messages {
        logger.write_group(
            comm.as_ref(),
            level_for(i),
            format!("message {} of {}", i + 1, args.messages),
        )?;
    }

    logger.shutdown_listener(&comm).await?;
    info!("Rank {} finished after {} messages", comm.rank(), args.messages);

    if comm.rank() == OWNER_RANK {
        println!("{}", logger.filename().display());
    }
    logger.close();

    Ok(())
}

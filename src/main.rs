//! Hash-affinity connection distributor (host binary).
//!
//! ```text
//!                  ┌──────────────────────────────────────────────┐
//!   TCP clients    │               DISTRIBUTOR                    │
//!   ───────────────┼─▶ listener ──▶ hash(peer ip) mod N ──▶ queue │──newconn──▶ worker-1
//!                  │                                        queue │──newconn──▶ worker-2
//!                  │                                        queue │──newconn──▶ worker-N
//!                  │                      ◀──── {accepted} ───────┤
//!                  └──────────────────────────────────────────────┘
//! ```
//!
//! Runs the distributor with `workers.count` in-process demo workers. Each
//! worker greets the client with its id and closes the connection.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};

use hash_distributor::config::{load_config, DistributorConfig};
use hash_distributor::distributor::WorkerId;
use hash_distributor::lifecycle::shutdown_signal;
use hash_distributor::observability::{logging, metrics};
use hash_distributor::service::{Distributor, DistributorHandle, Handoff};
use hash_distributor::Shutdown;

#[derive(Parser)]
#[command(name = "hash-distributor")]
#[command(about = "Distribute TCP connections to workers by client address", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DistributorConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("hash-distributor v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        key = %config.distributor_key(),
        workers = config.workers.count,
        max_pending = config.listener.max_pending,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let (handle, distributor) = Distributor::spawn(&config, shutdown.subscribe());

    let mut notices = Vec::with_capacity(config.workers.count);
    for n in 1..=config.workers.count as u64 {
        let id = WorkerId(n);
        let (transport, handoffs) = handle.channel_worker(id);
        notices.push(handle.add(id, 1, transport).await?);
        tokio::spawn(run_demo_worker(id, handoffs, config.workers.reject_every, shutdown.subscribe()));
    }

    for notice in notices {
        let sockname = notice.wait().await?;
        tracing::info!(address = %sockname, "Listening for connections");
    }

    shutdown_signal().await?;
    print_stats(&handle).await;
    shutdown.trigger();
    distributor.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Serve handoffs for one worker until shutdown.
///
/// With `reject_every = k > 0`, every k-th handoff is rejected and goes back
/// to the queue.
async fn run_demo_worker(
    id: WorkerId,
    mut handoffs: mpsc::UnboundedReceiver<Handoff>,
    reject_every: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut seen: u64 = 0;
    loop {
        let handoff = tokio::select! {
            handoff = handoffs.recv() => match handoff {
                Some(handoff) => handoff,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        seen += 1;
        if reject_every > 0 && seen % reject_every == 0 {
            tracing::debug!(worker = %id, peer = %handoff.peer, "Demo worker rejecting handoff");
            handoff.ack.reject();
            continue;
        }

        let Handoff { stream, peer, ack, .. } = handoff;
        ack.accept();
        tokio::spawn(async move {
            if let Err(e) = greet(id, stream).await {
                tracing::warn!(worker = %id, peer = %peer, error = %e, "Demo worker write failed");
            }
        });
    }
    tracing::debug!(worker = %id, "Demo worker stopped");
}

async fn greet(id: WorkerId, stream: std::net::TcpStream) -> std::io::Result<()> {
    let mut stream = tokio::net::TcpStream::from_std(stream)?;
    stream.write_all(format!("served by {}\n", id).as_bytes()).await?;
    stream.shutdown().await
}

async fn print_stats(handle: &DistributorHandle) {
    if let Ok(stats) = handle.stats().await {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::warn!(error = %e, "Failed to encode stats"),
        }
    }
}

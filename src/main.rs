//! Entry point for `sr-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, signal handling, argument parsing).

use std::io::BufRead;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use sr_over_udp::packet::MAX_PAYLOAD;
use sr_over_udp::simulator::{FaultConfig, FaultInjector};
use sr_over_udp::socket::UdpTransport;
use sr_over_udp::{Config, SrConnection};

/// Pause before retrying a send the window rejected.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Selective Repeat reliable message transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send messages to the peer, wait for every ACK, then exit.
    Send {
        #[command(flatten)]
        link: LinkArgs,
        /// Messages to send; one per line from stdin when omitted.
        messages: Vec<String>,
    },
    /// Print every message received from the peer until Ctrl-C.
    Recv {
        #[command(flatten)]
        link: LinkArgs,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// Local address to bind (e.g. 127.0.0.1:9000).
    #[arg(short, long)]
    local: SocketAddr,
    /// Peer address (e.g. 127.0.0.1:9001).
    #[arg(short, long)]
    remote: SocketAddr,
    /// Send and receive window size.
    #[arg(short, long, default_value_t = 10)]
    window: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 150)]
    timeout_ms: u64,
    /// Give up waiting for outstanding ACKs on exit after this long.
    #[arg(long, default_value_t = 10_000)]
    drain_timeout_ms: u64,
    /// Probability of dropping each outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability of corrupting each outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,
}

impl LinkArgs {
    fn config(&self) -> Config {
        Config::default()
            .with_window_size(self.window)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_drain_timeout(Duration::from_millis(self.drain_timeout_ms))
    }

    async fn transport(&self) -> anyhow::Result<UdpTransport> {
        let transport = UdpTransport::bind(self.local, self.remote)
            .await
            .with_context(|| format!("binding {} for peer {}", self.local, self.remote))?;
        let faults = FaultConfig::lossy(self.loss, self.corrupt);
        if faults.is_clean() {
            Ok(transport)
        } else {
            log::info!("Simulating loss={} corrupt={}", self.loss, self.corrupt);
            Ok(transport.with_faults(FaultInjector::from_os_rng(faults)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send { link, messages } => run_send(link, messages).await,
        Mode::Recv { link } => run_recv(link).await,
    }
}

async fn run_send(link: LinkArgs, messages: Vec<String>) -> anyhow::Result<()> {
    let messages = if messages.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .context("reading messages from stdin")?
    } else {
        messages
    };
    if let Some((i, long)) = messages
        .iter()
        .enumerate()
        .find(|(_, m)| m.len() > MAX_PAYLOAD)
    {
        anyhow::bail!(
            "message {} is {} bytes; at most {MAX_PAYLOAD} fit in one datagram",
            i + 1,
            long.len()
        );
    }

    let conn = SrConnection::start(link.transport().await?, link.config(), |msg| {
        println!("{}", String::from_utf8_lossy(&msg));
    })?;
    log::info!("Sending {} message(s) to {}", messages.len(), link.remote);

    for message in messages {
        let bytes = message.into_bytes();
        while !conn.send(bytes.clone()) {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    conn.shutdown().await.context("draining outstanding messages")?;
    log::info!("All messages acknowledged");
    Ok(())
}

async fn run_recv(link: LinkArgs) -> anyhow::Result<()> {
    let conn = SrConnection::start(link.transport().await?, link.config(), |msg| {
        println!("{}", String::from_utf8_lossy(&msg));
    })?;
    log::info!("Receiving on {} from {}", link.local, link.remote);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    log::info!("Interrupted, shutting down");
    conn.shutdown().await?;
    Ok(())
}

// crates/commp-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::Parser;
use commp_core::STRIDE;
use commp_ingest::{process_reader, IngestConfig};
use commp_ringbuf::Config as RingConfig;
use std::io::Write;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "commp",
    about = "Streaming Filecoin piece commitment (commP) calculator",
    long_about = "Streaming Filecoin piece commitment (commP) calculator.\n\nReads a byte stream from stdin and prints the 32-byte commitment as hex. Memory use is bounded by the ring buffer size regardless of input length.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    /// Top-level chunk size in bytes; must be a whole number of 127-byte
    /// windows
    #[arg(long, default_value_t = STRIDE)]
    stride: usize,

    /// Run the Merkle reduction as one worker thread per tree layer
    #[arg(long, default_value_t = false)]
    pipelined: bool,

    /// Print the commitment framed as a Filecoin piece CID (raw hex) instead
    /// of the bare digest
    #[arg(long, default_value_t = false)]
    cid: bool,

    /// Emit a one-line JSON run summary to stderr
    #[arg(long, default_value_t = false)]
    stats: bool,

    /// Size of the ingestion ring buffer in bytes
    #[arg(long, default_value_t = 24 * 1024 * 1024)]
    ring_buffer_size: usize,

    /// (EXPERT SETTING) Size of each ring buffer reservation sector in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    ring_buffer_sector_size: usize,

    /// (EXPERT SETTING) Free space required before the next read(2) is issued
    #[arg(long, default_value_t = 256 * 1024)]
    ring_buffer_min_read: usize,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = IngestConfig {
        stride: cli.stride,
        ring: RingConfig {
            buffer_size: cli.ring_buffer_size,
            sector_size: cli.ring_buffer_sector_size,
            min_read: cli.ring_buffer_min_read,
            ..IngestConfig::default().ring
        },
        pipelined: cli.pipelined,
    };

    info!(
        stride = cfg.stride,
        pipelined = cfg.pipelined,
        "reading stream from stdin"
    );

    let stdin = std::io::stdin();
    let outcome = process_reader(&cfg, stdin.lock()).context("computing commP")?;

    if cli.cid {
        println!("{}", hex::encode(outcome.piece_cid()));
    } else {
        println!("{}", hex::encode(outcome.commp));
    }

    if cli.stats {
        let line = serde_json::to_string(&outcome.stats)
            .context("serializing stats summary")?;
        let mut err = std::io::stderr().lock();
        writeln!(err, "{line}").context("emitting stats summary")?;
    }

    Ok(())
}

/// Initialize tracing with an env-driven filter (default WARN so the digest
/// on stdout stays pipeline-friendly).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

//! Flush every physical node behind a DSN
//!
//! Works for single nodes, sharded host lists and clusters alike.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use valkey_sequence::{Proxy, Value};

/// Run FLUSHALL on every node of a Valkey/Redis deployment
#[derive(Parser, Debug)]
#[command(name = "flush-nodes")]
#[command(version, about, long_about = None)]
struct Args {
    /// Connection DSN, e.g. redis://localhost:6379 or redis:?host[a:7000]&redis_cluster=1
    dsn: String,

    /// Only list the nodes that would be flushed
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Errors only
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn run(args: &Args) -> Result<()> {
    let proxy = Proxy::from_dsn(&args.dsn).context("Failed to connect")?;
    flush_nodes(&proxy, args.dry_run)
}

/// FLUSHALL on every node; fails if any node failed
fn flush_nodes(proxy: &Proxy, dry_run: bool) -> Result<()> {
    info!("Found {} node(s)", proxy.count()?);

    let mut failed = Vec::new();
    for (index, node) in proxy.nodes()?.enumerate() {
        if dry_run {
            info!("Would flush node {}", index);
            continue;
        }
        match node.call("FLUSHALL", Vec::<Value>::new()) {
            Ok(reply) => info!("Node {}: {}", index, reply),
            Err(e) => {
                error!("Node {}: {}", index, e);
                failed.push(index);
            }
        }
    }

    if !failed.is_empty() {
        bail!("FLUSHALL failed on node(s) {:?}", failed);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose, args.quiet);

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

//! Hearth node
//!
//! Opens the entity runtime from a TOML config and drives a contended
//! counter workload through it: sessions submit increments on a fair
//! scheduler, transactions retry on conflict, committed changes are written
//! behind to the stores. Exits non-zero if the final counter totals do not
//! match the committed increments.
//!
//! Usage:
//!   hearth-node --config hearth.toml --groups 8 --sessions 16

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hearth_entity::{Hearth, HearthConfig};
use hearth_node::{Workload, register, run_workload};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "hearth-node")]
#[command(about = "Hearth entity runtime node")]
struct Args {
    /// Path to the TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured node id
    #[arg(long)]
    node_id: Option<u64>,

    /// Key groups the counters are spread over
    #[arg(long, default_value = "8")]
    groups: u64,

    /// Counters per key group
    #[arg(long, default_value = "4")]
    counters: u32,

    /// Increments submitted per key group
    #[arg(long, default_value = "200")]
    increments: u32,

    /// Sessions submitting increments concurrently
    #[arg(long, default_value = "16")]
    sessions: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => HearthConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => HearthConfig::default(),
    };
    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
        config.validate().context("invalid --node-id")?;
    }

    info!(node_id = config.node_id, "Hearth node starting...");
    let hearth = Arc::new(Hearth::open(&config).context("failed to open entity runtime")?);
    register(&hearth)?;

    let workload = Workload {
        groups: args.groups,
        counters_per_group: args.counters,
        increments_per_group: args.increments,
        sessions: args.sessions,
    };
    let report = run_workload(&hearth, &workload)?;
    let flushed = hearth.shutdown();

    println!("\n========================================");
    println!("  Hearth Workload Finished");
    println!("========================================");
    println!("  Node:       {}", config.node_id);
    println!("  Submitted:  {}", report.submitted);
    println!("  Succeeded:  {}", report.succeeded);
    println!("  Failed:     {}", report.failed);
    println!("  Errors:     {}", report.errors);
    println!("  Retries:    {}", report.retries);
    println!("  Total:      {}", report.total);
    println!("  Flushed:    {}", flushed);
    println!("========================================\n");
    println!("{}", serde_json::to_string(&report)?);

    anyhow::ensure!(
        report.is_consistent(),
        "counter totals do not match committed increments: {report:?}"
    );
    Ok(())
}

fn init_logging(verbose: bool) {
    let builder = FmtSubscriber::builder().with_target(false).compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => {
            let level = if verbose { Level::DEBUG } else { Level::INFO };
            builder.with_max_level(level).init();
        }
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use searchad_rank_watch::report::{build_report, print_report, write_report};
use searchad_rank_watch::snapshot::Snapshot;
use searchad_rank_watch::store;

#[derive(Parser)]
#[command(name = "rank-report", about = "Summarize a rank snapshot into a bucketed report")]
struct Args {
    /// Snapshot JSON path
    #[arg(long, default_value = "out/ranks_latest.json")]
    input: PathBuf,

    /// Output directory
    #[arg(long, default_value = "out")]
    outdir: PathBuf,

    /// Only include items with imp >= this value in the ranking lists
    #[arg(long = "min-imp", default_value_t = 1)]
    min_imp: u64,

    /// Top/bottom N items per device
    #[arg(long, default_value_t = 50)]
    top: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let snapshot: Snapshot = store::read_json_opt(&args.input)
        .with_context(|| format!("failed to read snapshot {}", args.input.display()))?;

    let report = build_report(&snapshot, args.min_imp, args.top);
    let (latest, historical) = write_report(&args.outdir, &report)?;

    println!("[OK] wrote: {}", latest.display());
    println!("[OK] wrote: {}", historical.display());
    print_report(&report);

    Ok(())
}

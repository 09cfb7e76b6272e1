use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use searchad_rank_watch::client::SignedClient;
use searchad_rank_watch::config::{AppConfig, Credentials, CONFIG_PATH};
use searchad_rank_watch::detector::observe_run;
use searchad_rank_watch::mapping::{
    self, build_keyword_map, load_keywords_csv, load_keywords_txt, resolve_keywords,
};
use searchad_rank_watch::notify::{format_alert_message, Notifier};
use searchad_rank_watch::snapshot::{build_snapshot, write_snapshot};
use searchad_rank_watch::stats::{fetch_stats_by_keyword_ids, summarize_by_keyword};
use searchad_rank_watch::store;

#[derive(Parser)]
#[command(name = "rank-watch", about = "SearchAd keyword rank-streak watcher")]
struct Args {
    /// Keyword list: one per line, or a CSV with a `keyword` column
    #[arg(long, default_value = "keywords.txt")]
    keywords: PathBuf,

    /// Config file (thresholds, HTTP tuning)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Keyword-ID cache file
    #[arg(long, default_value = mapping::CACHE_PATH)]
    cache: PathBuf,

    /// Streak state file
    #[arg(long, default_value = store::STATE_PATH)]
    state: PathBuf,

    /// Snapshot output directory
    #[arg(long, default_value = "out")]
    outdir: PathBuf,

    /// Reuse the keyword-ID cache instead of refreshing it from the API
    #[arg(long)]
    use_cache: bool,
}

fn load_keywords(path: &Path) -> Result<Vec<String>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        load_keywords_csv(path)
    } else {
        load_keywords_txt(path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    let creds = Credentials::from_env()?;
    let client = SignedClient::new(&creds, &config.http)?;
    let notifier = Notifier::new(creds.webhook_url.as_deref())?;

    // 1) Input keywords
    let wanted = load_keywords(&args.keywords)?;
    info!("Loaded {} keyword(s) from {}", wanted.len(), args.keywords.display());

    // 2) Account keyword-ID mapping
    let keyword_map = build_keyword_map(&client, &args.cache, !args.use_cache).await?;
    info!(
        "Keyword map loaded: {} unique keyword(s) in account cache",
        keyword_map.map.len()
    );

    // 3) Resolve wanted keywords against the account
    let resolved = resolve_keywords(&wanted, &keyword_map);
    if !resolved.missing.is_empty() {
        let sample: Vec<&str> = resolved.missing.iter().take(10).map(String::as_str).collect();
        warn!(
            "Missing in account: {} e.g. {:?}",
            resolved.missing.len(),
            sample
        );
    }
    if resolved.keyword_ids.is_empty() {
        anyhow::bail!("no keyword IDs to check");
    }
    info!("Checking {} keyword ID(s)", resolved.keyword_ids.len());

    // 4) Stats
    let rows = fetch_stats_by_keyword_ids(&client, &resolved.keyword_ids, config.http.max_ids_per_call).await?;
    info!("Stats rows received: {}", rows.len());
    let summary = summarize_by_keyword(&rows, &resolved.id_to_keyword);

    // 5) Streak detection against persisted state
    let mut state = store::read_json_or_default(&args.state);
    let alerts = observe_run(&mut state, &summary, &config.detector);
    store::write_json_atomic(&args.state, &state)?;

    // 6) Snapshot
    let snapshot = build_snapshot(&wanted, &keyword_map, &resolved.missing, &summary, rows.len());
    let (latest, historical) = write_snapshot(&args.outdir, &snapshot)?;
    info!("Snapshot written: {} and {}", latest.display(), historical.display());

    // 7) Alert delivery
    if alerts.is_empty() {
        info!("No alerts");
    } else {
        let message = format_alert_message(&alerts, &config.detector);
        notifier.notify(&message).await;
        info!("Alerts this run: {}", alerts.len());
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use subingest::store::open_store;
use subingest::{print_summary, Config, IngestOutcome, Ingestor};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "subingest")]
#[command(version, about = "Ingest video subtitles into a deduplicated store")]
#[command(long_about = "Resolve video URLs, run the subtitle extraction worker for each, and store every segment once per (video, language, start time).")]
struct Cli {
    /// Video URLs (or bare 11-character video ids)
    #[arg(required = true)]
    urls: Vec<String>,

    /// Database URL: sqlite://<path>, sqlite::memory: or postgres://...
    #[arg(long)]
    database_url: Option<String>,

    /// Worker program; the video id is passed as its last argument
    #[arg(long)]
    worker: Option<String>,

    /// Worker timeout in seconds (0 disables)
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of videos ingested concurrently
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Print outcomes as JSON lines instead of a summary
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(ref url) = cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(ref worker) = cli.worker {
        config.worker_program = worker.clone();
        config.worker_args.clear();
    }
    if let Some(timeout) = cli.timeout {
        config.worker_timeout_secs = timeout;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
}

fn report(urls: &[String], outcomes: &[IngestOutcome], json: bool) -> Result<()> {
    for (url, outcome) in urls.iter().zip(outcomes) {
        if json {
            println!("{}", serde_json::to_string(outcome)?);
        } else {
            print_summary(url, outcome);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;
    apply_cli(&mut config, &cli);
    config
        .validate()
        .context("Configuration validation failed")?;

    info!("Store:  {}", config.database_url);
    info!("Worker: {} {:?}", config.worker_program, config.worker_args);

    let store = open_store(&config.database_url, config.pool_size)
        .await
        .context("Failed to open subtitle store")?;
    let worker = Arc::new(config.process_worker());
    let ingestor = Ingestor::new(worker, store).with_progress(!cli.json && cli.urls.len() > 1);

    // Dropping the in-flight requests on Ctrl+C kills their workers.
    let outcomes = tokio::select! {
        outcomes = ingestor.ingest_many(&cli.urls, config.concurrency) => outcomes,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling in-flight ingestion");
            return Ok(ExitCode::from(130));
        }
    };

    report(&cli.urls, &outcomes, cli.json)?;

    if outcomes.iter().all(IngestOutcome::is_success) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use std::io::stderr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use zhangdan_batch::{export, BatchResult, BatchRunner};
use zhangdan_ocr::ImagePipeline;

mod config;

/// How long shutdown waits for recognition threads abandoned after a timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "zhangdan", version, about = "Extract and classify transactions from bill screenshots")]
struct Cli {
    /// Directory of screenshots
    #[arg(long, short, default_value = "input_images")]
    input: PathBuf,

    /// Output file; `.xlsx` or `.json` write one workbook, anything else CSV sheets
    #[arg(long, short, default_value = "transactions.xlsx")]
    output: PathBuf,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    verbose: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra classification rules (`[[rule]]` tables)
    #[arg(long)]
    rules: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let outcome = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(cli.config.as_deref())?;
    let classifier = config::build_classifier(&cfg, cli.rules.as_deref())?;
    let backend = config::build_backend(&cfg.ocr, cfg.batch.timeout())?;
    let pipeline = ImagePipeline::new(backend, &cfg.pipeline(), classifier);
    let runner = BatchRunner::new(pipeline, cfg.batch.clone());

    let cancel = runner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; remaining images will be skipped");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let timer = Instant::now();
    let result = runner
        .run(&cli.input)
        .await
        .with_context(|| format!("process {}", cli.input.display()))?;
    info!("Processed batch in: {:?}", timer.elapsed());

    match export(&result, &cli.output) {
        Ok(files) => {
            print_summary(&result);
            for file in files {
                println!("Wrote {}", file.display());
            }
            Ok(())
        }
        Err(e) => {
            print_summary(&result);
            error!("Export failed: {e}");
            Err(e).with_context(|| format!("write {}", cli.output.display()))
        }
    }
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries the summary; logs go to stderr.
    let terminal_log = fmt::layer()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(filter);

    tracing_subscriber::registry().with(terminal_log).init();
}

fn print_summary(result: &BatchResult) {
    let s = &result.summary;
    let stats = &result.statistics;
    println!("Transactions: {}", stats.total_records);
    println!(
        "Images: {} found, {} processed, {} skipped",
        s.images_found, s.images_processed, s.images_skipped
    );
    println!("Duplicates removed: {}", s.duplicates_removed);
    println!("Recognition rate: {:.1}%", stats.recognition_rate * 100.0);
    println!("Overall data quality: {:.1}%", stats.overall_quality * 100.0);
    println!(
        "Complete transactions: {} ({:.1}%), {} issues",
        stats.complete_records,
        stats.complete_rate * 100.0,
        s.record_issues
    );
    for row in &stats.by_category {
        println!("  {}: {}", row.name, row.count);
    }
    for skipped in &result.skipped {
        println!("Skipped {}: {}", skipped.image, skipped.reason);
    }
}

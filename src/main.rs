use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kline_harvest::archive::Granularity;
use kline_harvest::config::AppConfig;
use kline_harvest::crawler::BinanceRestClient;
use kline_harvest::{pipeline, report};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kline-harvest", version, about = "Download Binance kline history")]
struct Cli {
    /// JSON configuration file; defaults apply for anything it omits
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Comma-separated symbols, e.g. BTCUSDT,ETHUSDT
    #[arg(long, global = true, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Comma-separated intervals, e.g. 1m,1d
    #[arg(long, global = true, value_delimiter = ',')]
    intervals: Vec<String>,

    /// Pairs processed concurrently
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the REST klines endpoint backward from now and write CSV tables
    Crawl {
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Download the daily or monthly zip archives for a date range
    Archive {
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum)]
        granularity: Option<Granularity>,
        /// First date, YYYY-MM-DD
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last date, YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Concurrent downloads per pair
        #[arg(long)]
        downloads_per_pair: Option<usize>,
    },
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(n) = self.concurrency {
            config.max_concurrency = n;
        }
        let (symbols, intervals) = match &self.command {
            Command::Crawl { out, page_size } => {
                if let Some(out) = out {
                    config.crawl.output_dir = out.clone();
                }
                if let Some(page_size) = page_size {
                    config.crawl.page_size = *page_size;
                }
                (&mut config.crawl.symbols, &mut config.crawl.intervals)
            }
            Command::Archive {
                out,
                granularity,
                start,
                end,
                downloads_per_pair,
            } => {
                if let Some(out) = out {
                    config.archive.output_dir = out.clone();
                }
                if let Some(granularity) = granularity {
                    config.archive.granularity = *granularity;
                }
                if let Some(start) = start {
                    config.archive.start_date = *start;
                }
                if end.is_some() {
                    config.archive.end_date = *end;
                }
                if let Some(n) = downloads_per_pair {
                    config.archive.downloads_per_pair = *n;
                }
                (&mut config.archive.symbols, &mut config.archive.intervals)
            }
        };
        if !self.symbols.is_empty() {
            *symbols = self.symbols.clone();
        }
        if !self.intervals.is_empty() {
            *intervals = self.intervals.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())
        .await
        .context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let started = Instant::now();

    match cli.command {
        Command::Crawl { .. } => {
            let end_time = chrono::Utc::now().timestamp_millis();
            let source = Arc::new(BinanceRestClient::new(config.crawl.api_base.clone())?);
            info!(end_time, pairs = config.crawl.symbols.len() * config.crawl.intervals.len(), "starting crawl");

            let outcome = pipeline::run_crawl(source, &config, end_time).await;
            report::print_crawl(&outcome, end_time);
            info!(elapsed = ?started.elapsed(), "crawl complete");

            if outcome.succeeded() == 0 {
                bail!("every crawl failed");
            }
        }
        Command::Archive { .. } => {
            let client = reqwest::Client::builder()
                .pool_max_idle_per_host(50)
                .build()?;
            info!(
                start = %config.archive.start_date,
                end = %config.archive.resolved_end_date(),
                granularity = %config.archive.granularity,
                "starting archive download"
            );

            let outcome = pipeline::run_archive(&client, &config).await;
            report::print_archive(&outcome);
            info!(elapsed = ?started.elapsed(), "download complete");

            if outcome.files_downloaded() == 0 && outcome.files_failed() + outcome.pairs_failed() > 0 {
                bail!("no archive file could be downloaded");
            }
        }
    }

    Ok(())
}

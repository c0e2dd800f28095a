//! The two acquisition pipelines. Both fan out over every configured
//! (symbol, interval) pair and report one outcome per pair.

use crate::archive::{self, Granularity};
use crate::config::AppConfig;
use crate::crawler::{KlineSource, crawl_series};
use crate::downloader::{TaskOutcome, download_all, fan_out};
use crate::error::{FetchError, Result};
use crate::retry::RetryPolicy;
use crate::storage_utils::{AsyncStorageManager, ensure_dir};
use chrono::NaiveDate;
use reqwest::Client;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

fn pair_key(symbol: &str, interval: &str) -> String {
    format!("{}/{}", symbol, interval)
}

/// Every distinct (symbol, interval) combination, first-seen order. Repeats
/// would race on the same output file.
fn pairs(symbols: &[String], intervals: &[String]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .flat_map(|s| intervals.iter().map(move |i| (s.clone(), i.clone())))
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSeries {
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug)]
pub struct CrawlReport {
    pub outcomes: Vec<TaskOutcome<SavedSeries>>,
}

impl CrawlReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Crawls every configured pair back from `end_time` and writes one table
/// per pair, oldest candle first.
pub async fn run_crawl<S>(source: Arc<S>, config: &AppConfig, end_time: i64) -> CrawlReport
where
    S: KlineSource + 'static,
{
    let options = config.crawl.options(&config.retry);

    let jobs: Vec<_> = pairs(&config.crawl.symbols, &config.crawl.intervals)
        .into_iter()
        .map(|(symbol, interval)| {
            let source = Arc::clone(&source);
            let options = options.clone();
            let output_dir = config.crawl.output_dir.clone();
            let key = pair_key(&symbol, &interval);
            let job = async move {
                info!("fetching klines");
                let series = crawl_series(source.as_ref(), &symbol, &interval, end_time, &options)
                    .await?
                    .into_chronological();
                debug_assert!(series.is_strictly_ascending());
                let storage = AsyncStorageManager::new(output_dir).await?;
                let path = storage.save_series(&series).await?;
                Ok::<_, FetchError>(SavedSeries {
                    path,
                    rows: series.len(),
                })
            };
            let span = info_span!("crawl", pair = %key);
            (key, job.instrument(span))
        })
        .collect();

    let outcomes = fan_out(jobs, config.max_concurrency).await;
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            warn!(pair = %outcome.key, error = %e, "crawl failed");
        }
    }
    CrawlReport { outcomes }
}

/// Downloads for one (symbol, interval). `files` holds one outcome per URL.
#[derive(Debug)]
pub struct PairDownloads {
    pub save_dir: PathBuf,
    pub files: Vec<TaskOutcome<PathBuf>>,
}

impl PairDownloads {
    pub fn downloaded(&self) -> usize {
        self.files.iter().filter(|f| f.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.downloaded()
    }
}

#[derive(Debug)]
pub struct ArchiveReport {
    pub pairs: Vec<TaskOutcome<PairDownloads>>,
}

impl ArchiveReport {
    pub fn files_downloaded(&self) -> usize {
        self.pairs
            .iter()
            .filter_map(|p| p.result.as_ref().ok())
            .map(PairDownloads::downloaded)
            .sum()
    }

    pub fn files_failed(&self) -> usize {
        self.pairs
            .iter()
            .filter_map(|p| p.result.as_ref().ok())
            .map(PairDownloads::failed)
            .sum()
    }

    /// Pairs that could not even start (e.g. their directory was not creatable).
    pub fn pairs_failed(&self) -> usize {
        self.pairs.iter().filter(|p| !p.is_ok()).count()
    }
}

/// Everything one pair's archive task needs, owned so it can be spawned.
struct ArchiveJob {
    client: Client,
    base_url: String,
    symbol: String,
    interval: String,
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
    save_dir: PathBuf,
    downloads: usize,
    retry: RetryPolicy,
}

impl ArchiveJob {
    async fn run(self) -> Result<PairDownloads> {
        ensure_dir(&self.save_dir).await?;

        let refs = archive::enumerate(
            &self.base_url,
            &self.symbol,
            &self.interval,
            self.start,
            self.end,
            self.granularity,
        );
        info!(urls = refs.len(), dir = %self.save_dir.display(), "archive urls enumerated");

        let files = download_all(
            &self.client,
            refs,
            &self.save_dir,
            self.downloads,
            &self.retry,
        )
        .await;

        let pair = PairDownloads {
            save_dir: self.save_dir,
            files,
        };
        info!(
            downloaded = pair.downloaded(),
            failed = pair.failed(),
            "archive downloads joined"
        );
        Ok(pair)
    }
}

/// Enumerates and downloads the archive files of every configured pair into
/// `<output_dir>/<symbol>/<interval>/`.
pub async fn run_archive(client: &Client, config: &AppConfig) -> ArchiveReport {
    let settings = &config.archive;
    let end = settings.resolved_end_date();

    let jobs: Vec<_> = pairs(&settings.symbols, &settings.intervals)
        .into_iter()
        .map(|(symbol, interval)| {
            let key = pair_key(&symbol, &interval);
            let span = info_span!("archive", pair = %key);
            let job = ArchiveJob {
                client: client.clone(),
                base_url: settings.base_url.clone(),
                save_dir: archive::save_dir(&settings.output_dir, &symbol, &interval),
                symbol,
                interval,
                start: settings.start_date,
                end,
                granularity: settings.granularity,
                downloads: settings.downloads_per_pair,
                retry: config.retry.clone(),
            };
            (key, job.run().instrument(span))
        })
        .collect();

    let outcomes = fan_out(jobs, config.max_concurrency).await;
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            warn!(pair = %outcome.key, error = %e, "archive pair failed");
        }
    }
    ArchiveReport { pairs: outcomes }
}

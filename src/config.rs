//! Run configuration.
//!
//! Everything has a default matching the public Binance endpoints, so a run
//! without a config file works. A JSON file may override any subset of fields.

use crate::archive::{DEFAULT_ARCHIVE_BASE, Granularity};
use crate::crawler::{CrawlOptions, DEFAULT_API_BASE};
use crate::error::{FetchError, Result};
use crate::retry::RetryPolicy;
use crate::storage_utils::load_json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Kline intervals the exchange accepts.
pub const VALID_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

/// Upper bound the klines endpoint places on `limit`.
pub const MAX_PAGE_SIZE: u32 = 1000;

// CONFIGURATION STRUCTS
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CrawlConfig {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>, // e.g., "1m", "1d"
    pub api_base: String,
    pub page_size: u32,     // candles per request, at most 1000
    pub page_pause_ms: u64, // sleep between consecutive pages
    pub output_dir: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            symbols: ["BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT"]
                .map(String::from)
                .to_vec(),
            intervals: vec!["1d".to_string()],
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: MAX_PAGE_SIZE,
            page_pause_ms: 100,
            output_dir: PathBuf::from("csv"),
        }
    }
}

impl CrawlConfig {
    pub fn options(&self, retry: &RetryPolicy) -> CrawlOptions {
        CrawlOptions {
            page_size: self.page_size,
            page_pause: Duration::from_millis(self.page_pause_ms),
            retry: retry.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>,
    /// Includes the market segment, e.g. `.../data/spot`.
    pub base_url: String,
    pub granularity: Granularity,
    pub start_date: NaiveDate,
    /// Defaults to today (UTC) when absent.
    pub end_date: Option<NaiveDate>,
    pub output_dir: PathBuf,
    /// Concurrent downloads within one (symbol, interval).
    pub downloads_per_pair: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            symbols: ["BTCUSDT", "ETHUSDT", "BNBUSDT"].map(String::from).to_vec(),
            intervals: vec!["1m".to_string()],
            base_url: DEFAULT_ARCHIVE_BASE.to_string(),
            granularity: Granularity::Daily,
            start_date: NaiveDate::from_ymd_opt(2018, 8, 1).unwrap_or_default(),
            end_date: None,
            output_dir: PathBuf::from("static"),
            downloads_per_pair: 16,
        }
    }
}

impl ArchiveConfig {
    pub fn resolved_end_date(&self) -> NaiveDate {
        self.end_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Concurrent (symbol, interval) pairs.
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub crawl: CrawlConfig,
    pub archive: ArchiveConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            retry: RetryPolicy::default(),
            crawl: CrawlConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

fn validate_pairs(section: &str, symbols: &[String], intervals: &[String]) -> Result<()> {
    if symbols.is_empty() {
        return Err(FetchError::Config(format!("{section}: no symbols configured")));
    }
    if intervals.is_empty() {
        return Err(FetchError::Config(format!("{section}: no intervals configured")));
    }
    if let Some(bad) = symbols.iter().find(|s| s.is_empty() || s.contains('/')) {
        return Err(FetchError::Config(format!("{section}: invalid symbol {bad:?}")));
    }
    if let Some(bad) = intervals
        .iter()
        .find(|i| !VALID_INTERVALS.contains(&i.as_str()))
    {
        return Err(FetchError::Config(format!("{section}: unknown interval {bad:?}")));
    }
    Ok(())
}

impl AppConfig {
    /// **Config Load**
    /// Loads `path` if given, otherwise the defaults. The result is validated.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        // 1. File or defaults; fields missing from the file keep their defaults
        let config = match path {
            Some(path) => {
                let config: AppConfig = load_json(path).await?;
                info!(path = %path.display(), "configuration loaded");
                config
            }
            None => AppConfig::default(),
        };

        // 2. Reject anything the upstream would refuse anyway
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(FetchError::Config("max_concurrency must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.crawl.page_size) {
            return Err(FetchError::Config(format!(
                "crawl.page_size must be within 1..={MAX_PAGE_SIZE}, got {}",
                self.crawl.page_size
            )));
        }
        if self.archive.downloads_per_pair == 0 {
            return Err(FetchError::Config(
                "archive.downloads_per_pair must be at least 1".into(),
            ));
        }
        validate_pairs("crawl", &self.crawl.symbols, &self.crawl.intervals)?;
        validate_pairs("archive", &self.archive.symbols, &self.archive.intervals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.crawl.page_size, 1000);
        assert_eq!(config.crawl.page_pause_ms, 100);
        assert_eq!(config.archive.start_date.to_string(), "2018-08-01");
        assert_eq!(config.archive.granularity, Granularity::Daily);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let json = r#"{
            "max_concurrency": 2,
            "archive": { "granularity": "monthly", "end_date": "2021-03-31" }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.archive.granularity, Granularity::Monthly);
        assert_eq!(
            config.archive.resolved_end_date(),
            NaiveDate::from_ymd_opt(2021, 3, 31).unwrap()
        );
        assert_eq!(config.crawl, CrawlConfig::default());
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let mut config = AppConfig::default();
        config.crawl.page_size = 1001;
        assert!(matches!(config.validate(), Err(FetchError::Config(_))));
        config.crawl.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_interval_and_empty_lists() {
        let mut config = AppConfig::default();
        config.archive.intervals = vec!["7m".into()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.crawl.symbols.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn crawl_options_carry_pause_and_retry() {
        let config = AppConfig::default();
        let options = config.crawl.options(&RetryPolicy::none());
        assert_eq!(options.page_pause, Duration::from_millis(100));
        assert_eq!(options.retry.max_retries, 0);
    }

    #[tokio::test]
    async fn load_reads_and_validates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "crawl": { "intervals": ["1h", "4h"] } }"#).unwrap();

        let config = AppConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.crawl.intervals, vec!["1h", "4h"]);

        std::fs::write(&path, r#"{ "crawl": { "intervals": ["bogus"] } }"#).unwrap();
        assert!(AppConfig::load(Some(&path)).await.is_err());
    }
}

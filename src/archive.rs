use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_ARCHIVE_BASE: &str = "https://data.binance.vision/data/spot";

/// Bucketing unit of the public kline archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }

    fn date_format(self) -> &'static str {
        match self {
            Granularity::Daily => "%Y-%m-%d",
            Granularity::Monthly => "%Y-%m",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One archive file: where it lives upstream and what it is called locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRef {
    pub url: String,
    pub file_name: String,
    pub date_token: String,
}

impl ArchiveRef {
    pub fn save_path(&self, save_dir: &Path) -> PathBuf {
        save_dir.join(&self.file_name)
    }
}

/// `<base_dir>/<symbol>/<interval>`
pub fn save_dir(base_dir: &Path, symbol: &str, interval: &str) -> PathBuf {
    base_dir.join(symbol).join(interval)
}

/// Lists the archive files covering `start..=end`.
///
/// Daily mode yields one file per calendar day. Monthly mode yields one file
/// per calendar month touched by the range; the day of month is ignored.
/// A `start` after `end` yields nothing.
pub fn enumerate(
    base_url: &str,
    symbol: &str,
    interval: &str,
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
) -> Vec<ArchiveRef> {
    let prefix = format!(
        "{}/{}/klines/{}/{}",
        base_url.trim_end_matches('/'),
        granularity,
        symbol,
        interval
    );

    let (mut current, last) = match granularity {
        Granularity::Daily => (start, end),
        Granularity::Monthly => (first_of_month(start), first_of_month(end)),
    };

    let mut refs = Vec::new();
    while current <= last {
        let date_token = current.format(granularity.date_format()).to_string();
        let file_name = format!("{}-{}-{}.zip", symbol, interval, date_token);
        refs.push(ArchiveRef {
            url: format!("{}/{}", prefix, file_name),
            file_name,
            date_token,
        });

        let next = match granularity {
            Granularity::Daily => current.checked_add_days(Days::new(1)),
            Granularity::Monthly => current.checked_add_months(Months::new(1)),
        };
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    refs
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

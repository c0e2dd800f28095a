use crate::error::{FetchError, Result};
use crate::klines::{Candle, Series, decode_page};
use crate::retry::{RetryPolicy, retry_with_backoff};
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub const DEFAULT_API_BASE: &str = "https://api.binance.com/api/v3";

/// One request for the page of candles ending at `end_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub symbol: String,
    pub interval: String,
    /// Inclusive upper bound on `open_time`, in ms since epoch.
    pub end_time: i64,
    pub limit: u32,
}

impl PageRequest {
    fn query(&self) -> [(&'static str, String); 4] {
        [
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.clone()),
            ("endTime", self.end_time.to_string()),
            ("limit", self.limit.to_string()),
        ]
    }
}

/// A paged source of candles. Pages are oldest-first and contain at most
/// `limit` candles with `open_time <= end_time`; an empty page means there is
/// nothing older.
pub trait KlineSource: Send + Sync {
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<Vec<Candle>>> + Send;
}

#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
}

impl BinanceRestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().pool_max_idle_per_host(50).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Pulls the ban expiry out of a `-1003` "way too many requests" body.
fn parse_ban_until(body: &str) -> Option<u64> {
    if !body.contains("-1003") {
        return None;
    }
    let re = Regex::new(r"until\s+(\d+)").ok()?;
    re.captures(body)?.get(1)?.as_str().parse().ok()
}

/// Maps rate limits and other non-success statuses onto [`FetchError`].
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();

    if status == StatusCode::IM_A_TEAPOT || status == StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::RateLimited {
            status,
            ban_until_ms: parse_ban_until(&body),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::UpstreamStatus { status, body });
    }

    Ok(response)
}

impl KlineSource for BinanceRestClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Candle>> {
        let url = format!("{}/klines", self.base_url);
        let response = self.client.get(&url).query(&request.query()).send().await?;
        let body = check_status(response).await?.bytes().await?;
        Ok(decode_page(&body)?)
    }
}

/// Knobs for one backward crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub page_size: u32,
    /// Courtesy pause between consecutive pages.
    pub page_pause: Duration,
    pub retry: RetryPolicy,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            page_size: 1000,
            page_pause: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

/// Walks backward from `end_time` one page at a time until the source
/// returns an empty page.
///
/// The returned series is in fetch order (newest page first). Any error
/// aborts the crawl; no partial series is returned.
#[instrument(skip(source, options), fields(page_size = options.page_size))]
pub async fn crawl_series<S: KlineSource>(
    source: &S,
    symbol: &str,
    interval: &str,
    end_time: i64,
    options: &CrawlOptions,
) -> Result<Series> {
    let mut series = Series::new(symbol, interval);
    let mut request = PageRequest {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        end_time,
        limit: options.page_size,
    };
    let mut pages = 0usize;

    loop {
        let current = &request;
        let page = retry_with_backoff(&options.retry, || source.fetch_page(current)).await?;
        let Some(first) = page.first() else {
            break;
        };

        pages += 1;
        request.end_time = first.open_time - 1;
        debug!(page = pages, candles = page.len(), next_end_time = request.end_time, "fetched page");
        series.push_older_page(page);

        tokio::time::sleep(options.page_pause).await;
    }

    info!(pages, candles = series.len(), "crawl finished");
    Ok(series)
}

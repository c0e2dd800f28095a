use crate::error::{FetchError, Result};
use crate::klines::Series;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Header of the persisted kline table. Only these seven columns are written.
pub const CSV_HEADER: [&str; 7] = [
    "Open Time",
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "Close Time",
];

/// Reads a JSON file straight into `T`.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    // Read bytes; serde_json validates UTF-8 while parsing.
    let content = fs::read(path)
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;
    Ok(serde_json::from_slice(&content)?)
}

/// Idempotent `mkdir -p`.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| FetchError::filesystem(path, e))
}

/// **Atomic Write**
/// Writes `bytes` to a `.tmp` sibling, then renames it over `final_path`.
/// A crash mid-write leaves the previous file (if any) untouched.
pub async fn write_atomic(final_path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(final_path);

    // 1. Write everything to the temporary file
    fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| FetchError::filesystem(&tmp_path, e))?;

    // 2. Swap it in under the final name
    fs::rename(&tmp_path, final_path)
        .await
        .map_err(|e| FetchError::filesystem(final_path, e))
}

pub fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    final_path.with_file_name(name)
}

// STORAGE MANAGER
/// Owns one output directory and writes kline tables into it.
pub struct AsyncStorageManager {
    // Directory every table of this manager lands in (e.g. "csv")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// **Constructor: new**
    /// Binds the manager to `base_dir`, creating it (and any parents) if it
    /// does not exist yet.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        // 1. Own the path
        let base_dir = base_dir.as_ref().to_path_buf();

        // 2. Create the directory now, so later saves never have to check
        //    whether it exists.
        ensure_dir(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn series_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{}.csv", symbol, interval))
    }

    /// **Kline Table Save**
    /// Writes one row per candle in the series' current order, under the
    /// fixed seven-column header. Returns the path written.
    ///
    /// An empty series still produces a file holding just the header.
    pub async fn save_series(&self, series: &Series) -> Result<PathBuf> {
        let path = self.series_path(&series.symbol, &series.interval);

        // 1. Render the whole table in memory
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        for k in &series.candles {
            writer.write_record([
                k.open_time.to_string().as_str(),
                k.open.as_str(),
                k.high.as_str(),
                k.low.as_str(),
                k.close.as_str(),
                k.volume.as_str(),
                k.close_time.to_string().as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| FetchError::filesystem(&path, e.into_error()))?;

        // 2. Replace any previous table in one rename
        write_atomic(&path, &bytes).await?;

        info!(
            symbol = %series.symbol,
            interval = %series.interval,
            rows = series.len(),
            path = %path.display(),
            "kline table saved"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klines::tests::candle;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_series_still_gets_a_header() {
        let dir = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(dir.path().join("csv")).await.unwrap();

        let path = storage.save_series(&Series::new("BTCUSDT", "1d")).await.unwrap();

        assert_eq!(path, dir.path().join("csv").join("BTCUSDT_1d.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Open Time,Open,High,Low,Close,Volume,Close Time\n");
    }

    #[tokio::test]
    async fn writes_one_row_per_candle_in_series_order() {
        let dir = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let mut series = Series::new("ETHUSDT", "1h");
        series.push_older_page(vec![candle(120_000), candle(180_000)]);
        series.push_older_page(vec![candle(0), candle(60_000)]);

        let path = storage.save_series(&series).await.unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[0][0], "120000");
        assert_eq!(&rows[0][1], "1.00000000");
        assert_eq!(&rows[0][6], "179999");
        assert_eq!(&rows[2][0], "0");
        assert!(!tmp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn ensure_dir_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).await.unwrap();
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn unwritable_target_is_a_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = AsyncStorageManager::new(blocker.join("csv")).await.err().unwrap();
        assert!(matches!(err, FetchError::Filesystem { .. }));
    }

    #[derive(Deserialize)]
    struct Probe {
        name: String,
    }

    #[tokio::test]
    async fn loads_json_documents() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("probe.json"), br#"{"name":"ok"}"#).unwrap();
        let probe: Probe = load_json(&dir.path().join("probe.json")).await.unwrap();
        assert_eq!(probe.name, "ok");
    }
}

use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Column names of the positional kline array, in wire order.
pub const KLINE_KEYS: &[&str] = &[
    "openTime",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "closeTime",
    "quoteAssetVolume",
    "numberOfTrades",
    "takerBuyBaseAssetVolume",
    "takerBuyQuoteAssetVolume",
    "ignore",
];

/// One OHLCV observation as returned by the klines endpoint.
///
/// Decimal quantities stay as the exchange's strings so no precision is lost
/// between the wire and the persisted table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candle {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: i64,
    pub quote_asset_volume: String,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: String,
    pub taker_buy_quote_asset_volume: String,
    pub ignore: String,
}

struct CandleVisitor;

fn next_field<'de, A, T>(seq: &mut A, index: usize) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::missing_field(KLINE_KEYS[index]))
}

impl<'de> Visitor<'de> for CandleVisitor {
    type Value = Candle;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a kline array with 12 positional elements")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let open_time = next_field(&mut seq, 0)?;
        let open = next_field(&mut seq, 1)?;
        let high = next_field(&mut seq, 2)?;
        let low = next_field(&mut seq, 3)?;
        let close = next_field(&mut seq, 4)?;
        let volume = next_field(&mut seq, 5)?;
        let close_time = next_field(&mut seq, 6)?;
        let quote_asset_volume = next_field(&mut seq, 7)?;
        let number_of_trades = next_field(&mut seq, 8)?;
        let taker_buy_base_asset_volume = next_field(&mut seq, 9)?;
        let taker_buy_quote_asset_volume = next_field(&mut seq, 10)?;
        let ignore = match next_field::<A, Value>(&mut seq, 11)? {
            Value::String(s) => s,
            other => other.to_string(),
        };

        // Newer API revisions may append fields; they are not part of the candle.
        while seq.next_element::<IgnoredAny>()?.is_some() {}

        Ok(Candle {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
            quote_asset_volume,
            number_of_trades,
            taker_buy_base_asset_volume,
            taker_buy_quote_asset_volume,
            ignore,
        })
    }
}

impl<'de> Deserialize<'de> for Candle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(CandleVisitor)
    }
}

/// Decodes one page body. Any element that does not match the positional
/// layout fails the whole page.
pub fn decode_page(body: &[u8]) -> serde_json::Result<Vec<Candle>> {
    serde_json::from_slice(body)
}

/// The candles collected for one (symbol, interval) pair.
///
/// Pages arrive newest-first while each page is oldest-first internally, so
/// `candles` is block-reverse-chronological until [`Series::into_chronological`].
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub symbol: String,
    pub interval: String,
    pub candles: Vec<Candle>,
}

impl Series {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            candles: Vec::new(),
        }
    }

    /// Appends a page that is older than everything collected so far.
    pub fn push_older_page(&mut self, page: Vec<Candle>) {
        self.candles.extend(page);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Sorts the candles oldest-first. This is the order persisted to disk.
    pub fn into_chronological(mut self) -> Self {
        self.candles.sort_by_key(|c| c.open_time);
        self
    }

    /// True when every `open_time` is strictly greater than its predecessor,
    /// which also rules out duplicate candles.
    pub fn is_strictly_ascending(&self) -> bool {
        self.candles
            .windows(2)
            .all(|pair| pair[0].open_time < pair[1].open_time)
    }
}

//! Market data - provider seam, HTTP adapter and snapshot building

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MarketDataError;
use crate::indicators::{self, Bands, IndicatorLibrary, Macd};

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    #[default]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
        }
    }
}

/// Market data collaborator
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Candles ordered oldest first
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;

    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal, MarketDataError>;
}

/// Periods used for the standard indicator set attached to every snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: Decimal,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub levels_period: usize,
    pub volume_period: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            atr_period: 14,
            rsi_period: 14,
            sma_fast: 20,
            sma_slow: 50,
            ema_fast: 12,
            ema_slow: 26,
            bollinger_period: 20,
            bollinger_std_dev: Decimal::TWO,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            levels_period: 20,
            volume_period: 20,
        }
    }
}

/// Computed indicator set. `None` while the window is warming up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorValues {
    pub atr: Option<Decimal>,
    pub rsi: Option<f64>,
    pub sma_fast: Option<Decimal>,
    pub sma_slow: Option<Decimal>,
    pub ema_fast: Option<Decimal>,
    pub ema_slow: Option<Decimal>,
    pub bollinger: Option<Bands>,
    pub macd: Option<Macd>,
    pub support: Option<Decimal>,
    pub resistance: Option<Decimal>,
    pub average_volume: Option<Decimal>,
}

/// Everything a strategy or the SL/TP manager may look at for one symbol
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub candles: Vec<Candle>,
    pub indicators: IndicatorValues,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Build a snapshot from an ordered candle window. `None` for an empty window.
    pub fn build(
        symbol: &str,
        candles: Vec<Candle>,
        library: &dyn IndicatorLibrary,
        settings: &IndicatorSettings,
    ) -> Option<Self> {
        let last = candles.last()?.clone();
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let levels = library.levels(&candles, settings.levels_period);

        let indicators = IndicatorValues {
            atr: library.atr(&candles, settings.atr_period),
            rsi: library.rsi(&closes, settings.rsi_period),
            sma_fast: library.sma(&closes, settings.sma_fast),
            sma_slow: library.sma(&closes, settings.sma_slow),
            ema_fast: library.ema(&closes, settings.ema_fast),
            ema_slow: library.ema(&closes, settings.ema_slow),
            bollinger: library.bollinger(&closes, settings.bollinger_period, settings.bollinger_std_dev),
            macd: library.macd(&closes, settings.macd_fast, settings.macd_slow, settings.macd_signal),
            support: levels.map(|(support, _)| support),
            resistance: levels.map(|(_, resistance)| resistance),
            average_volume: indicators::average_volume(&candles, settings.volume_period),
        };

        Some(Self {
            symbol: symbol.to_string(),
            close: last.close,
            high: last.high,
            low: last.low,
            volume: last.volume,
            timestamp: last.timestamp,
            candles,
            indicators,
        })
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Replace the close with a fresher quote (keeps high/low consistent)
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self
    }
}

/// Client for a market data service exposing `/candles/{symbol}` and `/prices/{symbol}`
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

impl HttpMarketData {
    /// Create new market data client. Every request carries `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn path_symbol(symbol: &str) -> String {
        symbol.replace('/', "-")
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        symbol: &str,
        query: &[(&str, String)],
    ) -> Result<T, MarketDataError> {
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketDataError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Transient(format!("{} - {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let url = format!("{}/candles/{}", self.base_url, Self::path_symbol(symbol));
        let query = [
            ("interval", interval.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let response: CandlesResponse = self.get(&url, symbol, &query).await?;

        let mut candles = response.candles;
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal, MarketDataError> {
        let url = format!("{}/prices/{}", self.base_url, Self::path_symbol(symbol));
        let response: PriceResponse = self.get(&url, symbol, &[]).await?;

        response
            .price
            .parse()
            .map_err(|e| MarketDataError::InvalidResponse(format!("price '{}': {}", response.price, e)))
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::StandardIndicators;
    use chrono::Duration as ChronoDuration;

    fn series(count: usize) -> Vec<Candle> {
        let start = Utc::now() - ChronoDuration::hours(count as i64);
        (0..count)
            .map(|i| {
                let close = Decimal::from(100 + i as i64);
                Candle {
                    timestamp: start + ChronoDuration::hours(i as i64),
                    open: close - Decimal::ONE,
                    high: close + Decimal::TWO,
                    low: close - Decimal::TWO,
                    close,
                    volume: Decimal::from(500),
                }
            })
            .collect()
    }

    #[test]
    fn test_snapshot_uses_last_candle() {
        let snapshot =
            MarketSnapshot::build("BTC/USDT", series(60), &StandardIndicators, &IndicatorSettings::default())
                .unwrap();
        assert_eq!(snapshot.close, Decimal::from(159));
        assert_eq!(snapshot.high, Decimal::from(161));
        assert!(snapshot.indicators.atr.is_some());
        assert!(snapshot.indicators.sma_slow.is_some());
        assert!(snapshot.indicators.macd.is_some());
    }

    #[test]
    fn test_snapshot_warm_up() {
        let snapshot =
            MarketSnapshot::build("BTC/USDT", series(5), &StandardIndicators, &IndicatorSettings::default())
                .unwrap();
        assert!(snapshot.indicators.atr.is_none());
        assert!(snapshot.indicators.rsi.is_none());
        assert!(MarketSnapshot::build("BTC/USDT", vec![], &StandardIndicators, &IndicatorSettings::default()).is_none());
    }

    #[test]
    fn test_with_price_extends_range() {
        let snapshot =
            MarketSnapshot::build("BTC/USDT", series(3), &StandardIndicators, &IndicatorSettings::default())
                .unwrap()
                .with_price(Decimal::from(200));
        assert_eq!(snapshot.close, Decimal::from(200));
        assert_eq!(snapshot.high, Decimal::from(200));
    }

    #[test]
    fn test_interval_serde() {
        assert_eq!(serde_json::to_string(&Interval::Hour4).unwrap(), "\"4h\"");
        let parsed: Interval = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(parsed, Interval::Minute15);
    }
}

//! Indicator library seam
//!
//! Indicator math is owned by an external library; the engine only needs the
//! contract below. Every function returns `None` while the series is still
//! inside its warm-up window. `StandardIndicators` is the default adapter
//! wired in when the host does not inject its own.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

use crate::market::Candle;

/// Bollinger band levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// Pure indicator functions over a price series
pub trait IndicatorLibrary: Send + Sync {
    fn sma(&self, closes: &[Decimal], period: usize) -> Option<Decimal>;
    fn ema(&self, closes: &[Decimal], period: usize) -> Option<Decimal>;
    fn rsi(&self, closes: &[Decimal], period: usize) -> Option<f64>;
    fn atr(&self, candles: &[Candle], period: usize) -> Option<Decimal>;
    fn bollinger(&self, closes: &[Decimal], period: usize, std_dev: Decimal) -> Option<Bands>;
    fn macd(&self, closes: &[Decimal], fast: usize, slow: usize, signal: usize) -> Option<Macd>;
    /// (support, resistance) over the last `period` candles
    fn levels(&self, candles: &[Candle], period: usize) -> Option<(Decimal, Decimal)>;
}

/// Default adapter over the free functions in this module
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardIndicators;

impl IndicatorLibrary for StandardIndicators {
    fn sma(&self, closes: &[Decimal], period: usize) -> Option<Decimal> {
        sma(closes, period)
    }

    fn ema(&self, closes: &[Decimal], period: usize) -> Option<Decimal> {
        ema(closes, period)
    }

    fn rsi(&self, closes: &[Decimal], period: usize) -> Option<f64> {
        rsi(closes, period)
    }

    fn atr(&self, candles: &[Candle], period: usize) -> Option<Decimal> {
        atr(candles, period)
    }

    fn bollinger(&self, closes: &[Decimal], period: usize, std_dev: Decimal) -> Option<Bands> {
        bollinger(closes, period, std_dev)
    }

    fn macd(&self, closes: &[Decimal], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
        macd(closes, fast, slow, signal)
    }

    fn levels(&self, candles: &[Candle], period: usize) -> Option<(Decimal, Decimal)> {
        levels(candles, period)
    }
}

pub fn sma(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let sum: Decimal = closes.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u64))
}

/// EMA seeded with the SMA of the first `period` values
pub fn ema(closes: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(closes, period).last().copied()
}

/// Full EMA series; element 0 corresponds to `closes[period - 1]`
pub fn ema_series(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let multiplier = Decimal::TWO / (Decimal::from(period as u64) + Decimal::ONE);
    let seed: Decimal = closes.iter().take(period).sum::<Decimal>() / Decimal::from(period as u64);

    let mut series = Vec::with_capacity(closes.len() - period + 1);
    series.push(seed);

    let mut current = seed;
    for close in closes.iter().skip(period) {
        current = (*close - current) * multiplier + current;
        series.push(current);
    }
    series
}

/// RSI over the last `period` changes
pub fn rsi(closes: &[Decimal], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for window in closes[closes.len() - period - 1..].windows(2) {
        let change = (window[1] - window[0]).to_f64().unwrap_or(0.0);
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }

    if losses == 0.0 {
        return Some(if gains == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = gains / losses;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Wilder-smoothed Average True Range
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| {
            let (previous, current) = (&pair[0], &pair[1]);
            let range = current.high - current.low;
            let up = (current.high - previous.close).abs();
            let down = (current.low - previous.close).abs();
            range.max(up).max(down)
        })
        .collect();

    let period_dec = Decimal::from(period as u64);
    let mut value: Decimal = true_ranges.iter().take(period).sum::<Decimal>() / period_dec;
    for tr in true_ranges.iter().skip(period) {
        value = (value * (period_dec - Decimal::ONE) + *tr) / period_dec;
    }
    Some(value)
}

pub fn bollinger(closes: &[Decimal], period: usize, std_dev: Decimal) -> Option<Bands> {
    let middle = sma(closes, period)?;
    let variance: Decimal = closes
        .iter()
        .rev()
        .take(period)
        .map(|c| (*c - middle) * (*c - middle))
        .sum::<Decimal>()
        / Decimal::from(period as u64);
    let deviation = variance.sqrt()?;

    Some(Bands {
        upper: middle + deviation * std_dev,
        middle,
        lower: middle - deviation * std_dev,
    })
}

pub fn macd(closes: &[Decimal], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Align both series on the candles where the slow EMA exists
    let offset = slow - fast;
    let macd_line: Vec<Decimal> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_value)| fast_series[i + offset] - *slow_value)
        .collect();

    let signal_value = ema(&macd_line, signal)?;
    let macd_value = *macd_line.last()?;

    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

pub fn levels(candles: &[Candle], period: usize) -> Option<(Decimal, Decimal)> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let recent = &candles[candles.len() - period..];
    let support = recent.iter().map(|c| c.low).min()?;
    let resistance = recent.iter().map(|c| c.high).max()?;
    Some((support, resistance))
}

/// Mean volume of up to `period` candles before the latest one
pub fn average_volume(candles: &[Candle], period: usize) -> Option<Decimal> {
    if candles.len() < 2 || period == 0 {
        return None;
    }
    let count = period.min(candles.len() - 1);
    let sum: Decimal = candles.iter().rev().skip(1).take(count).map(|c| c.volume).sum();
    Some(sum / Decimal::from(count as u64))
}

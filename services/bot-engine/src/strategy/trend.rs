//! Trend Following Strategy
//!
//! Identifies and follows established price trends using:
//! - EMA crossovers (fast vs slow)
//! - Optional volume confirmation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExitDecision, ExitLevels, Strategy};
use crate::error::ConfigError;
use crate::indicators::ema_series;
use crate::market::MarketSnapshot;
use crate::types::{Side, SignalDirection, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendFollowingParams {
    pub fast_period: usize,
    pub slow_period: usize,
    /// Require the signal candle's volume above the recent average
    pub volume_confirmation: bool,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for TrendFollowingParams {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            volume_confirmation: false,
            stop_loss_pct: Decimal::from(5),
            take_profit_pct: Decimal::from(10),
        }
    }
}

/// Buys when the fast EMA crosses above the slow EMA, sells on the opposite cross
pub struct TrendFollowingStrategy {
    params: TrendFollowingParams,
    exits: ExitLevels,
}

/// Latest and previous values of both EMAs
struct Crossover {
    fast: Decimal,
    slow: Decimal,
    prev_fast: Decimal,
    prev_slow: Decimal,
}

impl TrendFollowingStrategy {
    pub const NAME: &'static str = "trend_following";

    pub fn new(params: TrendFollowingParams) -> Result<Self, ConfigError> {
        if params.fast_period < 2 {
            return Err(ConfigError::out_of_range("fast_period", params.fast_period, ">= 2"));
        }
        if params.fast_period >= params.slow_period {
            return Err(ConfigError::out_of_range(
                "slow_period",
                params.slow_period,
                "greater than fast_period",
            ));
        }
        let exits = ExitLevels {
            stop_loss_pct: params.stop_loss_pct,
            take_profit_pct: params.take_profit_pct,
        };
        exits.validate()?;

        Ok(Self { params, exits })
    }

    fn crossover(&self, snapshot: &MarketSnapshot) -> Option<Crossover> {
        let closes = snapshot.closes();
        let fast = ema_series(&closes, self.params.fast_period);
        let slow = ema_series(&closes, self.params.slow_period);
        if slow.len() < 2 {
            return None;
        }

        // Both series end on the latest candle
        Some(Crossover {
            fast: fast[fast.len() - 1],
            slow: slow[slow.len() - 1],
            prev_fast: fast[fast.len() - 2],
            prev_slow: slow[slow.len() - 2],
        })
    }

    fn volume_ok(&self, snapshot: &MarketSnapshot) -> bool {
        if !self.params.volume_confirmation {
            return true;
        }
        snapshot
            .indicators
            .average_volume
            .map(|avg| snapshot.volume > avg)
            .unwrap_or(false)
    }
}

impl Strategy for TrendFollowingStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn get_signal_direction(&self, snapshot: &MarketSnapshot) -> SignalDirection {
        let Some(c) = self.crossover(snapshot) else {
            return SignalDirection::None;
        };

        if !self.volume_ok(snapshot) {
            return SignalDirection::None;
        }

        // Bullish crossover: fast crosses above slow
        if c.fast > c.slow && c.prev_fast <= c.prev_slow {
            return SignalDirection::Buy;
        }

        // Bearish crossover: fast crosses below slow
        if c.fast < c.slow && c.prev_fast >= c.prev_slow {
            return SignalDirection::Sell;
        }

        SignalDirection::None
    }

    fn get_stop_loss(&self, entry: Decimal, side: Side, _snapshot: &MarketSnapshot) -> Decimal {
        self.exits.stop_loss(entry, side)
    }

    fn get_take_profit(&self, entry: Decimal, side: Side, _snapshot: &MarketSnapshot) -> Decimal {
        self.exits.take_profit(entry, side)
    }

    fn should_exit(&self, trade: &Trade, _current_price: Decimal, snapshot: &MarketSnapshot) -> ExitDecision {
        let Some(c) = self.crossover(snapshot) else {
            return ExitDecision::hold();
        };

        match trade.side {
            Side::Buy if c.fast < c.slow => ExitDecision::exit(format!(
                "Trend reversal: fast EMA {:.4} below slow EMA {:.4}",
                c.fast, c.slow
            )),
            Side::Sell if c.fast > c.slow => ExitDecision::exit(format!(
                "Trend reversal: fast EMA {:.4} above slow EMA {:.4}",
                c.fast, c.slow
            )),
            _ => ExitDecision::hold(),
        }
    }
}

//! Breakout Strategy
//!
//! Enters when price closes outside its recent trading range on expanding
//! volume. The range is measured on the candles *before* the signal candle so
//! the breakout candle cannot widen its own range.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExitDecision, ExitLevels, Strategy};
use crate::error::ConfigError;
use crate::indicators::{average_volume, levels};
use crate::market::MarketSnapshot;
use crate::types::{Side, SignalDirection, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutParams {
    pub lookback_period: usize,
    /// Breakout volume must reach average volume times this
    pub volume_multiplier: Decimal,
    /// Target distance as a multiple of the range height
    pub range_target_multiplier: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            lookback_period: 20,
            volume_multiplier: Decimal::new(15, 1),
            range_target_multiplier: Decimal::TWO,
            stop_loss_pct: Decimal::from(3),
            take_profit_pct: Decimal::from(6),
        }
    }
}

pub struct BreakoutStrategy {
    params: BreakoutParams,
    exits: ExitLevels,
}

/// Range of the lookback window preceding the latest candle
#[derive(Debug, Clone, Copy)]
struct PriorRange {
    support: Decimal,
    resistance: Decimal,
}

impl PriorRange {
    fn height(&self) -> Decimal {
        self.resistance - self.support
    }
}

impl BreakoutStrategy {
    pub const NAME: &'static str = "breakout";

    pub fn new(params: BreakoutParams) -> Result<Self, ConfigError> {
        if params.lookback_period < 2 {
            return Err(ConfigError::out_of_range("lookback_period", params.lookback_period, ">= 2"));
        }
        if params.volume_multiplier < Decimal::ZERO {
            return Err(ConfigError::out_of_range("volume_multiplier", params.volume_multiplier, ">= 0"));
        }
        if params.range_target_multiplier <= Decimal::ZERO {
            return Err(ConfigError::out_of_range(
                "range_target_multiplier",
                params.range_target_multiplier,
                "> 0",
            ));
        }
        let exits = ExitLevels {
            stop_loss_pct: params.stop_loss_pct,
            take_profit_pct: params.take_profit_pct,
        };
        exits.validate()?;

        Ok(Self { params, exits })
    }

    fn prior_range(&self, snapshot: &MarketSnapshot) -> Option<PriorRange> {
        let (_, prior) = snapshot.candles.split_last()?;
        let (support, resistance) = levels(prior, self.params.lookback_period)?;
        Some(PriorRange { support, resistance })
    }

    fn volume_confirmed(&self, snapshot: &MarketSnapshot) -> bool {
        match average_volume(&snapshot.candles, self.params.lookback_period) {
            Some(avg) => snapshot.volume >= avg * self.params.volume_multiplier,
            None => false,
        }
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn get_signal_direction(&self, snapshot: &MarketSnapshot) -> SignalDirection {
        let Some(range) = self.prior_range(snapshot) else {
            return SignalDirection::None;
        };
        if !self.volume_confirmed(snapshot) {
            return SignalDirection::None;
        }

        if snapshot.close > range.resistance {
            SignalDirection::Buy
        } else if snapshot.close < range.support {
            SignalDirection::Sell
        } else {
            SignalDirection::None
        }
    }

    /// Stop just behind the broken level, or the percent fallback
    fn get_stop_loss(&self, entry: Decimal, side: Side, snapshot: &MarketSnapshot) -> Decimal {
        let level = self.prior_range(snapshot).map(|range| match side {
            Side::Buy => range.resistance,
            Side::Sell => range.support,
        });

        match level {
            Some(level) if side.sign() * (entry - level) > Decimal::ZERO => level,
            _ => self.exits.stop_loss(entry, side),
        }
    }

    fn get_take_profit(&self, entry: Decimal, side: Side, snapshot: &MarketSnapshot) -> Decimal {
        match self.prior_range(snapshot) {
            Some(range) if range.height() > Decimal::ZERO => {
                entry + side.sign() * range.height() * self.params.range_target_multiplier
            }
            _ => self.exits.take_profit(entry, side),
        }
    }

    fn should_exit(&self, trade: &Trade, current_price: Decimal, snapshot: &MarketSnapshot) -> ExitDecision {
        let Some(range) = self.prior_range(snapshot) else {
            return ExitDecision::hold();
        };

        // Failed breakout: price fell through the opposite side of the range
        match trade.side {
            Side::Buy if current_price < range.support => {
                ExitDecision::exit(format!("Price {} broke below support {}", current_price, range.support))
            }
            Side::Sell if current_price > range.resistance => ExitDecision::exit(format!(
                "Price {} broke above resistance {}",
                current_price, range.resistance
            )),
            _ => ExitDecision::hold(),
        }
    }
}

//! Mean Reversion Strategy
//!
//! Trades oversold/overbought extremes expecting a return to the mean.
//! - RSI below the oversold level (optionally with a lower band touch) => Buy
//! - RSI above the overbought level (optionally with an upper band touch) => Sell

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExitDecision, ExitLevels, Strategy};
use crate::error::ConfigError;
use crate::indicators::{bollinger, rsi, Bands};
use crate::market::MarketSnapshot;
use crate::types::{Side, SignalDirection, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionParams {
    pub rsi_period: usize,
    pub oversold: f64,
    pub overbought: f64,
    /// Longs exit once RSI recovers to this level; shorts at `100 - exit_rsi`
    pub exit_rsi: f64,
    pub bb_period: usize,
    pub bb_std_dev: Decimal,
    pub require_band_touch: bool,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            exit_rsi: 60.0,
            bb_period: 20,
            bb_std_dev: Decimal::TWO,
            require_band_touch: true,
            stop_loss_pct: Decimal::from(5),
            take_profit_pct: Decimal::from(8),
        }
    }
}

pub struct MeanReversionStrategy {
    params: MeanReversionParams,
    exits: ExitLevels,
}

impl MeanReversionStrategy {
    pub const NAME: &'static str = "mean_reversion";

    pub fn new(params: MeanReversionParams) -> Result<Self, ConfigError> {
        if params.rsi_period < 2 {
            return Err(ConfigError::out_of_range("rsi_period", params.rsi_period, ">= 2"));
        }
        if params.bb_period < 2 {
            return Err(ConfigError::out_of_range("bb_period", params.bb_period, ">= 2"));
        }
        if params.bb_std_dev <= Decimal::ZERO {
            return Err(ConfigError::out_of_range("bb_std_dev", params.bb_std_dev, "> 0"));
        }
        if !(params.oversold > 0.0 && params.oversold < params.overbought && params.overbought < 100.0) {
            return Err(ConfigError::out_of_range(
                "overbought",
                format!("{}/{}", params.oversold, params.overbought),
                "0 < oversold < overbought < 100",
            ));
        }
        if !(50.0..100.0).contains(&params.exit_rsi) {
            return Err(ConfigError::out_of_range("exit_rsi", params.exit_rsi, "50 <= exit_rsi < 100"));
        }
        let exits = ExitLevels {
            stop_loss_pct: params.stop_loss_pct,
            take_profit_pct: params.take_profit_pct,
        };
        exits.validate()?;

        Ok(Self { params, exits })
    }

    fn rsi(&self, snapshot: &MarketSnapshot) -> Option<f64> {
        rsi(&snapshot.closes(), self.params.rsi_period)
    }

    fn bands(&self, snapshot: &MarketSnapshot) -> Option<Bands> {
        bollinger(&snapshot.closes(), self.params.bb_period, self.params.bb_std_dev)
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn get_signal_direction(&self, snapshot: &MarketSnapshot) -> SignalDirection {
        let Some(rsi) = self.rsi(snapshot) else {
            return SignalDirection::None;
        };
        let bands = self.bands(snapshot);
        let close = snapshot.close;

        let touches = |below: bool| match (&bands, self.params.require_band_touch) {
            (_, false) => true,
            (Some(b), true) if below => close <= b.lower,
            (Some(b), true) => close >= b.upper,
            (None, true) => false,
        };

        if rsi < self.params.oversold && touches(true) {
            return SignalDirection::Buy;
        }
        if rsi > self.params.overbought && touches(false) {
            return SignalDirection::Sell;
        }

        SignalDirection::None
    }

    fn get_stop_loss(&self, entry: Decimal, side: Side, _snapshot: &MarketSnapshot) -> Decimal {
        self.exits.stop_loss(entry, side)
    }

    /// Target the band midline when it sits on the profitable side of entry
    fn get_take_profit(&self, entry: Decimal, side: Side, snapshot: &MarketSnapshot) -> Decimal {
        if let Some(bands) = self.bands(snapshot) {
            let favourable = side.sign() * (bands.middle - entry) > Decimal::ZERO;
            if favourable {
                return bands.middle;
            }
        }
        self.exits.take_profit(entry, side)
    }

    fn should_exit(&self, trade: &Trade, _current_price: Decimal, snapshot: &MarketSnapshot) -> ExitDecision {
        let Some(rsi) = self.rsi(snapshot) else {
            return ExitDecision::hold();
        };

        match trade.side {
            Side::Buy if rsi >= self.params.exit_rsi => {
                ExitDecision::exit(format!("RSI {:.1} reverted above {:.1}", rsi, self.params.exit_rsi))
            }
            Side::Sell if rsi <= 100.0 - self.params.exit_rsi => ExitDecision::exit(format!(
                "RSI {:.1} reverted below {:.1}",
                rsi,
                100.0 - self.params.exit_rsi
            )),
            _ => ExitDecision::hold(),
        }
    }
}

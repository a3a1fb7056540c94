//! Strategy framework
//!
//! Strategies are pure, stateless signal generators: every call is a function
//! of the strategy's parameters and the market snapshot. They never hold
//! trade-specific state. Bots select a strategy by name; the registry resolves
//! the name once, at activation, and parameter problems surface there.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::market::MarketSnapshot;
use crate::types::{Side, SignalDirection, Trade};

pub mod breakout;
pub mod mean_reversion;
pub mod trend;

pub use breakout::{BreakoutParams, BreakoutStrategy};
pub use mean_reversion::{MeanReversionParams, MeanReversionStrategy};
pub use trend::{TrendFollowingParams, TrendFollowingStrategy};

/// Core strategy trait - all signal generators implement this
pub trait Strategy: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Entry signal for the latest snapshot
    fn get_signal_direction(&self, snapshot: &MarketSnapshot) -> SignalDirection;

    /// Fallback stop-loss price. The SL/TP manager may replace it.
    fn get_stop_loss(&self, entry: Decimal, side: Side, snapshot: &MarketSnapshot) -> Decimal;

    /// Fallback take-profit price. The SL/TP manager may replace it.
    fn get_take_profit(&self, entry: Decimal, side: Side, snapshot: &MarketSnapshot) -> Decimal;

    /// Strategy-specific exit for an open trade
    fn should_exit(&self, trade: &Trade, current_price: Decimal, snapshot: &MarketSnapshot) -> ExitDecision;
}

/// Result of `Strategy::should_exit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitDecision {
    pub should_exit: bool,
    pub reason: String,
}

impl ExitDecision {
    pub fn hold() -> Self {
        Self {
            should_exit: false,
            reason: String::new(),
        }
    }

    pub fn exit(reason: impl Into<String>) -> Self {
        Self {
            should_exit: true,
            reason: reason.into(),
        }
    }
}

/// Percent-based fallback exit levels shared by every strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExitLevels {
    /// Stop distance in percent of entry
    pub stop_loss_pct: Decimal,
    /// Target distance in percent of entry
    pub take_profit_pct: Decimal,
}

impl ExitLevels {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::out_of_range("stop_loss_pct", self.stop_loss_pct, "0 < pct < 100"));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return Err(ConfigError::out_of_range("take_profit_pct", self.take_profit_pct, "> 0"));
        }
        Ok(())
    }

    pub fn stop_loss(&self, entry: Decimal, side: Side) -> Decimal {
        offset_price(entry, side, -self.stop_loss_pct)
    }

    pub fn take_profit(&self, entry: Decimal, side: Side) -> Decimal {
        offset_price(entry, side, self.take_profit_pct)
    }
}

/// Move `entry` by `pct` percent in the trade's favour (negative = against)
pub fn offset_price(entry: Decimal, side: Side, pct: Decimal) -> Decimal {
    entry * (Decimal::ONE + side.sign() * pct / Decimal::ONE_HUNDRED)
}

/// Deserialize strategy parameters; `null` means "all defaults"
pub fn parse_params<T: DeserializeOwned + Default>(value: &serde_json::Value) -> Result<T, ConfigError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| ConfigError::Invalid(format!("strategy parameters: {}", e)))
}

/// Builds a strategy from raw parameters
pub type StrategyConstructor = fn(&serde_json::Value) -> Result<Box<dyn Strategy>, ConfigError>;

/// Name → constructor lookup table
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    constructors: BTreeMap<&'static str, StrategyConstructor>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in strategy
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(TrendFollowingStrategy::NAME, |params| {
            Ok(Box::new(TrendFollowingStrategy::new(parse_params(params)?)?))
        });
        registry.register(MeanReversionStrategy::NAME, |params| {
            Ok(Box::new(MeanReversionStrategy::new(parse_params(params)?)?))
        });
        registry.register(BreakoutStrategy::NAME, |params| {
            Ok(Box::new(BreakoutStrategy::new(parse_params(params)?)?))
        });
        registry
    }

    pub fn register(&mut self, name: &'static str, constructor: StrategyConstructor) {
        self.constructors.insert(name, constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    /// Instantiate a strategy. Unknown names and invalid parameters are configuration errors.
    pub fn create(&self, name: &str, params: &serde_json::Value) -> Result<Arc<dyn Strategy>, ConfigError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownStrategy(name.to_string()))?;
        constructor(params).map(Arc::from)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::indicators::StandardIndicators;
    use crate::market::{Candle, IndicatorSettings};
    use chrono::{Duration, Utc};

    /// Build a snapshot from closes; high/low hug the close, constant volume unless given
    pub fn snapshot_from(closes: &[f64], volumes: Option<&[f64]>) -> MarketSnapshot {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let close = Decimal::try_from(*close).unwrap();
                let volume = volumes
                    .map(|v| Decimal::try_from(v[i]).unwrap())
                    .unwrap_or(Decimal::from(1000));
                Candle {
                    timestamp: start + Duration::hours(i as i64),
                    open: close,
                    high: close + Decimal::new(5, 1),
                    low: close - Decimal::new(5, 1),
                    close,
                    volume,
                }
            })
            .collect();
        MarketSnapshot::build("BTC/USDT", candles, &StandardIndicators, &IndicatorSettings::default()).unwrap()
    }

    pub fn open_trade(side: Side, entry: Decimal) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4(),
            bot_id: uuid::Uuid::new_v4(),
            owner: uuid::Uuid::new_v4(),
            symbol: "BTC/USDT".to_string(),
            side,
            entry_price: entry,
            exit_price: None,
            quantity: Decimal::ONE,
            quantity_remaining: Decimal::ONE,
            status: crate::types::TradeStatus::Open,
            stop_loss_price: entry * Decimal::new(95, 2),
            initial_stop_loss: entry * Decimal::new(95, 2),
            take_profit_price: entry * Decimal::new(110, 2),
            take_profit_2: entry * Decimal::new(120, 2),
            tp1_exit_pct: Decimal::from(50),
            trade_phase: Default::default(),
            tp1_partial_executed: false,
            highest_price: entry,
            lowest_price: entry,
            realized_pnl: Decimal::ZERO,
            fees: Decimal::ZERO,
            close_reason: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }
}

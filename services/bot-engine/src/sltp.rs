//! Stop-loss / take-profit management
//!
//! Computes initial exit levels and position size for new trades, and walks
//! open trades through the PENDING → VALIDATED → TRAILING phase machine on
//! every price update. Phases only move forward and the stop only ever moves
//! in the trade's favour.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::market::MarketSnapshot;
use crate::risk::MAX_POSITION_CEILING_PCT;
use crate::symbols::{truncate_quantity, QUANTITY_DP};
use crate::types::{CloseReason, Side, Trade, TradePhase};

/// How the initial stop is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopLossMethod {
    /// `entry ∓ ATR × multiplier`
    #[default]
    Atr,
    /// `entry × (1 ∓ pct)`
    Percent,
}

/// Preset bundles of SL/TP defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

/// SL/TP parameters. Every percentage is in percent units (`1.5` = 1.5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SltpSettings {
    pub sl_method: StopLossMethod,
    pub sl_atr_multiplier: Decimal,
    pub sl_fixed_pct: Decimal,
    /// Used whenever the configured method cannot produce a sane stop
    pub fallback_sl_pct: Decimal,
    pub tp1_risk_reward: Decimal,
    pub tp2_risk_reward: Decimal,
    /// Share of the ORIGINAL quantity closed at TP1
    pub tp1_exit_pct: Decimal,
    pub validation_threshold_pct: Decimal,
    pub trailing_activation_pct: Decimal,
    pub trailing_distance_pct: Decimal,
    pub max_position_pct: Decimal,
}

impl SltpSettings {
    pub fn for_profile(profile: RiskProfile) -> Self {
        let (multiplier, tp1_rr, tp2_rr, tp1_exit) = match profile {
            RiskProfile::Conservative => (Decimal::ONE, Decimal::ONE, Decimal::TWO, Decimal::from(70)),
            RiskProfile::Moderate => (Decimal::new(15, 1), Decimal::new(15, 1), Decimal::from(3), Decimal::from(50)),
            RiskProfile::Aggressive => (Decimal::TWO, Decimal::TWO, Decimal::from(4), Decimal::from(30)),
        };

        Self {
            sl_method: StopLossMethod::Atr,
            sl_atr_multiplier: multiplier,
            sl_fixed_pct: Decimal::from(3),
            fallback_sl_pct: Decimal::from(3),
            tp1_risk_reward: tp1_rr,
            tp2_risk_reward: tp2_rr,
            tp1_exit_pct: tp1_exit,
            validation_threshold_pct: Decimal::new(5, 1),
            trailing_activation_pct: Decimal::TWO,
            trailing_distance_pct: Decimal::new(15, 1),
            max_position_pct: MAX_POSITION_CEILING_PCT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let hundred = Decimal::ONE_HUNDRED;
        let pct = |field: &'static str, value: Decimal| -> Result<(), ConfigError> {
            if value <= Decimal::ZERO || value >= hundred {
                return Err(ConfigError::out_of_range(field, value, "0 < pct < 100"));
            }
            Ok(())
        };

        if self.sl_atr_multiplier <= Decimal::ZERO {
            return Err(ConfigError::out_of_range("sl_atr_multiplier", self.sl_atr_multiplier, "> 0"));
        }
        pct("sl_fixed_pct", self.sl_fixed_pct)?;
        pct("fallback_sl_pct", self.fallback_sl_pct)?;
        pct("trailing_distance_pct", self.trailing_distance_pct)?;

        if self.tp1_risk_reward <= Decimal::ZERO {
            return Err(ConfigError::out_of_range("tp1_risk_reward", self.tp1_risk_reward, "> 0"));
        }
        if self.tp2_risk_reward <= self.tp1_risk_reward {
            return Err(ConfigError::out_of_range(
                "tp2_risk_reward",
                self.tp2_risk_reward,
                "greater than tp1_risk_reward",
            ));
        }
        if self.tp1_exit_pct <= Decimal::ZERO || self.tp1_exit_pct > hundred {
            return Err(ConfigError::out_of_range("tp1_exit_pct", self.tp1_exit_pct, "0 < pct <= 100"));
        }
        if self.validation_threshold_pct < Decimal::ZERO {
            return Err(ConfigError::out_of_range(
                "validation_threshold_pct",
                self.validation_threshold_pct,
                ">= 0",
            ));
        }
        if self.trailing_activation_pct < self.validation_threshold_pct {
            return Err(ConfigError::out_of_range(
                "trailing_activation_pct",
                self.trailing_activation_pct,
                ">= validation_threshold_pct",
            ));
        }
        if self.max_position_pct <= Decimal::ZERO || self.max_position_pct > MAX_POSITION_CEILING_PCT {
            return Err(ConfigError::out_of_range("max_position_pct", self.max_position_pct, "0 < pct <= 25"));
        }
        Ok(())
    }
}

impl Default for SltpSettings {
    fn default() -> Self {
        Self::for_profile(RiskProfile::default())
    }
}

/// Per-bot overrides layered on top of a risk profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SltpOverrides {
    pub sl_method: Option<StopLossMethod>,
    pub sl_atr_multiplier: Option<Decimal>,
    pub sl_fixed_pct: Option<Decimal>,
    pub fallback_sl_pct: Option<Decimal>,
    pub tp1_risk_reward: Option<Decimal>,
    pub tp2_risk_reward: Option<Decimal>,
    pub tp1_exit_pct: Option<Decimal>,
    pub validation_threshold_pct: Option<Decimal>,
    pub trailing_activation_pct: Option<Decimal>,
    pub trailing_distance_pct: Option<Decimal>,
}

impl SltpOverrides {
    pub fn apply(&self, mut base: SltpSettings) -> SltpSettings {
        fn overlay<T: Copy>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        overlay(&mut base.sl_method, self.sl_method);
        overlay(&mut base.sl_atr_multiplier, self.sl_atr_multiplier);
        overlay(&mut base.sl_fixed_pct, self.sl_fixed_pct);
        overlay(&mut base.fallback_sl_pct, self.fallback_sl_pct);
        overlay(&mut base.tp1_risk_reward, self.tp1_risk_reward);
        overlay(&mut base.tp2_risk_reward, self.tp2_risk_reward);
        overlay(&mut base.tp1_exit_pct, self.tp1_exit_pct);
        overlay(&mut base.validation_threshold_pct, self.validation_threshold_pct);
        overlay(&mut base.trailing_activation_pct, self.trailing_activation_pct);
        overlay(&mut base.trailing_distance_pct, self.trailing_distance_pct);
        base
    }
}

/// Initial take-profit levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeProfits {
    pub tp1: Decimal,
    pub tp2: Decimal,
}

/// Mutable SL/TP view of an open trade
#[derive(Debug, Clone, PartialEq)]
pub struct TradeState {
    pub side: Side,
    pub entry_price: Decimal,
    pub sl_initial: Decimal,
    pub sl_current: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub phase: TradePhase,
    pub tp1_hit: bool,
    pub quantity: Decimal,
    pub quantity_remaining: Decimal,
    pub tp1_exit_pct: Decimal,
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    /// Price that confirmed the trade; only known for transitions seen in this process
    pub validation_price: Option<Decimal>,
}

impl From<&Trade> for TradeState {
    fn from(trade: &Trade) -> Self {
        Self {
            side: trade.side,
            entry_price: trade.entry_price,
            sl_initial: trade.initial_stop_loss,
            sl_current: trade.stop_loss_price,
            tp1: trade.take_profit_price,
            tp2: trade.take_profit_2,
            phase: trade.trade_phase,
            tp1_hit: trade.tp1_partial_executed,
            quantity: trade.quantity,
            quantity_remaining: trade.quantity_remaining,
            tp1_exit_pct: trade.tp1_exit_pct,
            highest_price: trade.highest_price,
            lowest_price: trade.lowest_price,
            validation_price: None,
        }
    }
}

impl TradeState {
    /// Write the SL/TP fields back onto the persisted trade
    pub fn write_to(&self, trade: &mut Trade) {
        trade.stop_loss_price = self.sl_current;
        trade.trade_phase = self.phase;
        trade.tp1_partial_executed = self.tp1_hit;
        trade.highest_price = self.highest_price;
        trade.lowest_price = self.lowest_price;
    }

    /// Undo a TP1 partial whose order did not fill; the trade keeps its
    /// phase and extremes and TP1 fires again on the next update
    pub fn revert_partial(&mut self, stop: Decimal) {
        if self.tp1_hit {
            self.tp1_hit = false;
            self.sl_current = stop;
        }
    }

    /// Profit of `price` relative to entry, in percent, signed by side
    pub fn profit_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.sign() * (price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Move the stop to `candidate` only if that tightens it
    fn ratchet_stop(&mut self, candidate: Decimal) -> bool {
        let tighter = match self.side {
            Side::Buy => candidate > self.sl_current,
            Side::Sell => candidate < self.sl_current,
        };
        if tighter {
            self.sl_current = candidate;
        }
        tighter
    }

    /// Price at or through `level` in the trade's favour
    fn reached(&self, price: Decimal, level: Decimal) -> bool {
        self.side.sign() * (price - level) >= Decimal::ZERO
    }

    fn stopped_out(&self, price: Decimal) -> bool {
        self.side.sign() * (price - self.sl_current) <= Decimal::ZERO
    }
}

/// Outcome of one `update_trade` step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeUpdate {
    pub should_close: bool,
    pub close_reason: Option<CloseReason>,
    pub close_quantity: Decimal,
    pub new_sl: Option<Decimal>,
    pub new_phase: Option<TradePhase>,
    /// Stop in force before a TP1 partial moved it to TP1
    pub stop_before_partial: Option<Decimal>,
    pub log_message: Option<String>,
}

impl TradeUpdate {
    /// True when anything on the trade changed
    pub fn is_change(&self) -> bool {
        self.should_close || self.new_sl.is_some() || self.new_phase.is_some()
    }

    fn close(&mut self, reason: CloseReason, quantity: Decimal, message: String) {
        self.should_close = true;
        self.close_reason = Some(reason);
        self.close_quantity = quantity;
        self.log_message = Some(message);
    }
}

/// Stateless SL/TP calculator; all trade state lives in `TradeState`
#[derive(Debug, Clone, Copy, Default)]
pub struct SltpManager;

impl SltpManager {
    pub fn new() -> Self {
        Self
    }

    /// Initial stop. Falls back to `fallback_sl_pct` when the configured
    /// method yields nothing usable.
    pub fn calculate_stop_loss(
        &self,
        entry: Decimal,
        side: Side,
        snapshot: Option<&MarketSnapshot>,
        settings: &SltpSettings,
    ) -> Decimal {
        let candidate = match settings.sl_method {
            StopLossMethod::Atr => snapshot
                .and_then(|s| s.indicators.atr)
                .filter(|atr| *atr > Decimal::ZERO)
                .map(|atr| entry - side.sign() * atr * settings.sl_atr_multiplier),
            StopLossMethod::Percent => {
                Some(entry * (Decimal::ONE - side.sign() * settings.sl_fixed_pct / Decimal::ONE_HUNDRED))
            }
        };

        match candidate {
            Some(sl) if sl > Decimal::ZERO && side.sign() * (entry - sl) > Decimal::ZERO => sl,
            other => {
                let fallback = entry * (Decimal::ONE - side.sign() * settings.fallback_sl_pct / Decimal::ONE_HUNDRED);
                warn!(
                    "Stop-loss via {:?} unusable ({:?}), falling back to {}%: {}",
                    settings.sl_method, other, settings.fallback_sl_pct, fallback
                );
                fallback
            }
        }
    }

    /// `tp = entry ± distance × rr`. A non-positive distance uses the fallback percentage.
    pub fn calculate_take_profits(
        &self,
        entry: Decimal,
        sl_distance: Decimal,
        side: Side,
        settings: &SltpSettings,
    ) -> TakeProfits {
        let distance = if sl_distance > Decimal::ZERO {
            sl_distance
        } else {
            warn!("Non-positive stop distance {}, using fallback distance", sl_distance);
            entry * settings.fallback_sl_pct / Decimal::ONE_HUNDRED
        };

        TakeProfits {
            tp1: entry + side.sign() * distance * settings.tp1_risk_reward,
            tp2: entry + side.sign() * distance * settings.tp2_risk_reward,
        }
    }

    /// Risk-first sizing: lose `risk_percent` of the portfolio if the stop is
    /// hit, never committing more than `max_position_pct` of it.
    pub fn calculate_position_size_from_sl(
        &self,
        portfolio_value: Decimal,
        entry: Decimal,
        stop_loss: Decimal,
        risk_percent: Decimal,
        max_position_pct: Decimal,
    ) -> Decimal {
        if portfolio_value <= Decimal::ZERO || entry <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let budget = portfolio_value * max_position_pct / Decimal::ONE_HUNDRED;
        let max_quantity = budget / entry;
        let distance = (entry - stop_loss).abs();

        let quantity = if distance.is_zero() {
            max_quantity
        } else {
            let risk_amount = portfolio_value * risk_percent / Decimal::ONE_HUNDRED;
            (risk_amount / distance).min(max_quantity)
        };

        // Division may round up in the last digit; one lot step absorbs it
        let mut quantity = truncate_quantity(quantity);
        if quantity * entry > budget {
            quantity = truncate_quantity(quantity - Decimal::new(1, QUANTITY_DP));
        }
        quantity
    }

    /// Advance the phase machine for one price observation, then check for
    /// a close. At most one close event per call.
    pub fn update_trade(
        &self,
        state: &mut TradeState,
        price: Decimal,
        _snapshot: Option<&MarketSnapshot>,
        settings: &SltpSettings,
    ) -> TradeUpdate {
        let mut update = TradeUpdate::default();
        let starting_phase = state.phase;
        let starting_sl = state.sl_current;

        state.highest_price = state.highest_price.max(price);
        state.lowest_price = state.lowest_price.min(price);

        let profit_pct = state.profit_pct(price);

        if state.phase == TradePhase::Pending && profit_pct >= settings.validation_threshold_pct {
            state.phase = TradePhase::Validated;
            state.validation_price = Some(price);
            state.ratchet_stop(state.entry_price);
            debug!("Trade validated at {} ({:.2}%), stop to breakeven", price, profit_pct);
        }

        if state.phase >= TradePhase::Validated && profit_pct >= settings.trailing_activation_pct {
            state.phase = TradePhase::Trailing;
            let offset = price * settings.trailing_distance_pct / Decimal::ONE_HUNDRED;
            state.ratchet_stop(price - state.side.sign() * offset);
        }

        if state.stopped_out(price) {
            update.close(
                CloseReason::SlHit,
                state.quantity_remaining,
                format!("Stop hit at {} (stop {})", price, state.sl_current),
            );
        } else if !state.tp1_hit && state.reached(price, state.tp1) {
            let partial = truncate_quantity(state.quantity * state.tp1_exit_pct / Decimal::ONE_HUNDRED);
            if partial.is_zero() || partial >= state.quantity_remaining {
                update.close(
                    CloseReason::TpFull,
                    state.quantity_remaining,
                    format!("TP1 {} reached, closing full position", state.tp1),
                );
            } else {
                update.stop_before_partial = Some(state.sl_current);
                state.tp1_hit = true;
                state.ratchet_stop(state.tp1);
                update.close(
                    CloseReason::TpPartial,
                    partial,
                    format!("TP1 {} reached, closing {} of {}", state.tp1, partial, state.quantity),
                );
            }
        } else if state.reached(price, state.tp2) {
            update.close(
                CloseReason::TpFull,
                state.quantity_remaining,
                format!("TP2 {} reached", state.tp2),
            );
        }

        if update.should_close {
            state.quantity_remaining -= update.close_quantity;
        }
        if state.phase != starting_phase {
            update.new_phase = Some(state.phase);
        }
        if state.sl_current != starting_sl {
            update.new_sl = Some(state.sl_current);
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::StandardIndicators;
    use crate::market::{Candle, IndicatorSettings};
    use chrono::Utc;

    /// Snapshot whose ATR(14) is exactly `range`
    fn snapshot_with_atr(price: i64, range: i64) -> MarketSnapshot {
        let candles: Vec<Candle> = (0..20)
            .map(|_| Candle {
                timestamp: Utc::now(),
                open: Decimal::from(price),
                high: Decimal::from(price) + Decimal::from(range) / Decimal::TWO,
                low: Decimal::from(price) - Decimal::from(range) / Decimal::TWO,
                close: Decimal::from(price),
                volume: Decimal::from(100),
            })
            .collect();
        MarketSnapshot::build("BTC/USDT", candles, &StandardIndicators, &IndicatorSettings::default()).unwrap()
    }

    fn state(side: Side, entry: Decimal, sl: Decimal, tp1: Decimal, tp2: Decimal) -> TradeState {
        TradeState {
            side,
            entry_price: entry,
            sl_initial: sl,
            sl_current: sl,
            tp1,
            tp2,
            phase: TradePhase::Pending,
            tp1_hit: false,
            quantity: Decimal::ONE,
            quantity_remaining: Decimal::ONE,
            tp1_exit_pct: Decimal::from(50),
            highest_price: entry,
            lowest_price: entry,
            validation_price: None,
        }
    }

    #[test]
    fn test_atr_stop_and_targets() {
        let manager = SltpManager::new();
        let settings = SltpSettings::for_profile(RiskProfile::Moderate);
        let snapshot = snapshot_with_atr(100, 5);
        let entry = Decimal::from(100);

        let sl = manager.calculate_stop_loss(entry, Side::Buy, Some(&snapshot), &settings);
        assert_eq!(sl, Decimal::new(925, 1));

        let tps = manager.calculate_take_profits(entry, entry - sl, Side::Buy, &settings);
        assert_eq!(tps.tp1, Decimal::new(11125, 2));
        assert_eq!(tps.tp2, Decimal::new(1225, 1));
    }

    #[test]
    fn test_short_levels_mirror() {
        let manager = SltpManager::new();
        let settings = SltpSettings::for_profile(RiskProfile::Moderate);
        let snapshot = snapshot_with_atr(100, 5);
        let entry = Decimal::from(100);

        let sl = manager.calculate_stop_loss(entry, Side::Sell, Some(&snapshot), &settings);
        assert_eq!(sl, Decimal::new(1075, 1));
        let tps = manager.calculate_take_profits(entry, sl - entry, Side::Sell, &settings);
        assert_eq!(tps.tp1, Decimal::new(8875, 2));
        assert_eq!(tps.tp2, Decimal::new(775, 1));
    }

    #[test]
    fn test_stop_falls_back_without_atr() {
        let manager = SltpManager::new();
        let settings = SltpSettings::default();
        let sl = manager.calculate_stop_loss(Decimal::from(100), Side::Buy, None, &settings);
        assert_eq!(sl, Decimal::from(97));

        // ATR larger than the price would put the stop below zero
        let snapshot = snapshot_with_atr(10, 20);
        let sl = manager.calculate_stop_loss(Decimal::from(10), Side::Buy, Some(&snapshot), &settings);
        assert_eq!(sl, Decimal::new(97, 1));
    }

    #[test]
    fn test_percent_stop() {
        let manager = SltpManager::new();
        let settings = SltpSettings {
            sl_method: StopLossMethod::Percent,
            sl_fixed_pct: Decimal::from(2),
            ..SltpSettings::default()
        };
        let sl = manager.calculate_stop_loss(Decimal::from(200), Side::Buy, None, &settings);
        assert_eq!(sl, Decimal::from(196));
    }

    #[test]
    fn test_zero_distance_take_profit_fallback() {
        let manager = SltpManager::new();
        let settings = SltpSettings::default();
        let tps = manager.calculate_take_profits(Decimal::from(100), Decimal::ZERO, Side::Buy, &settings);
        // Fallback distance 3: tp1 = 100 + 3 × 1.5, tp2 = 100 + 3 × 3
        assert_eq!(tps.tp1, Decimal::new(1045, 1));
        assert_eq!(tps.tp2, Decimal::from(109));
    }

    #[test]
    fn test_position_size_capped() {
        let manager = SltpManager::new();
        let qty = manager.calculate_position_size_from_sl(
            Decimal::from(10000),
            Decimal::from(100),
            Decimal::new(975, 1),
            Decimal::TWO,
            Decimal::from(25),
        );
        assert_eq!(qty, Decimal::from(25));
    }

    #[test]
    fn test_position_size_risk_bound() {
        let manager = SltpManager::new();
        // Risk 1% of 10000 = 100 over a 10 stop → 10 units (cost 1000, under the 2500 cap)
        let qty = manager.calculate_position_size_from_sl(
            Decimal::from(10000),
            Decimal::from(100),
            Decimal::from(90),
            Decimal::ONE,
            Decimal::from(25),
        );
        assert_eq!(qty, Decimal::from(10));

        // Zero distance sizes at the cap
        let qty = manager.calculate_position_size_from_sl(
            Decimal::from(10000),
            Decimal::from(100),
            Decimal::from(100),
            Decimal::ONE,
            Decimal::from(25),
        );
        assert_eq!(qty, Decimal::from(25));
    }

    #[test]
    fn test_partial_close_quantity() {
        let manager = SltpManager::new();
        let settings = SltpSettings::default();
        let mut s = state(
            Side::Buy,
            Decimal::from(100),
            Decimal::from(95),
            Decimal::from(110),
            Decimal::from(120),
        );

        let update = manager.update_trade(&mut s, Decimal::from(110), None, &settings);
        assert!(update.should_close);
        assert_eq!(update.close_reason, Some(CloseReason::TpPartial));
        assert_eq!(update.close_quantity, Decimal::new(5, 1));
        assert_eq!(s.quantity_remaining, Decimal::new(5, 1));
        assert!(s.tp1_hit);
        assert_eq!(s.sl_current, Decimal::from(110));

        // Order did not fill: TP1 is armed again under the earlier stop
        let earlier = update.stop_before_partial.unwrap();
        assert!(earlier < Decimal::from(110));
        s.revert_partial(earlier);
        assert!(!s.tp1_hit);
        assert_eq!(s.sl_current, earlier);
        assert_eq!(s.phase, TradePhase::Trailing);
    }

    #[test]
    fn test_round_trip_path() {
        let manager = SltpManager::new();
        let settings = SltpSettings::for_profile(RiskProfile::Moderate);
        let entry = Decimal::from(100);
        let mut s = state(
            Side::Buy,
            entry,
            Decimal::new(925, 1),
            Decimal::new(11125, 2),
            Decimal::new(1225, 1),
        );

        let path = [
            entry,
            Decimal::new(1005, 1),
            Decimal::from(103),
            Decimal::new(11125, 2),
            Decimal::new(1225, 1),
        ];
        let updates: Vec<TradeUpdate> = path
            .iter()
            .map(|price| manager.update_trade(&mut s, *price, None, &settings))
            .collect();

        assert!(!updates[0].is_change());
        assert_eq!(updates[1].new_phase, Some(TradePhase::Validated));
        assert_eq!(updates[1].new_sl, Some(entry));
        assert_eq!(updates[2].new_phase, Some(TradePhase::Trailing));
        assert_eq!(updates[3].close_reason, Some(CloseReason::TpPartial));
        assert_eq!(updates[4].close_reason, Some(CloseReason::TpFull));
        assert_eq!(updates[4].close_quantity, Decimal::new(5, 1));
        assert_eq!(s.quantity_remaining, Decimal::ZERO);
        assert_eq!(s.phase, TradePhase::Trailing);
        assert_eq!(s.validation_price, Some(Decimal::new(1005, 1)));
        assert_eq!(s.sl_initial, Decimal::new(925, 1));
    }

    #[test]
    fn test_stop_hit_closes_everything() {
        let manager = SltpManager::new();
        let settings = SltpSettings::default();
        let mut s = state(
            Side::Sell,
            Decimal::from(100),
            Decimal::from(105),
            Decimal::from(90),
            Decimal::from(80),
        );
        let update = manager.update_trade(&mut s, Decimal::from(106), None, &settings);
        assert_eq!(update.close_reason, Some(CloseReason::SlHit));
        assert_eq!(update.close_quantity, Decimal::ONE);
        assert_eq!(s.phase, TradePhase::Pending);
    }

    #[test]
    fn test_trailing_never_loosens() {
        let manager = SltpManager::new();
        let settings = SltpSettings::default();
        let mut s = state(
            Side::Buy,
            Decimal::from(100),
            Decimal::from(95),
            Decimal::from(200),
            Decimal::from(300),
        );
        manager.update_trade(&mut s, Decimal::from(110), None, &settings);
        let high_water_stop = s.sl_current;
        let update = manager.update_trade(&mut s, Decimal::from(109), None, &settings);
        assert_eq!(s.sl_current, high_water_stop);
        assert!(update.new_sl.is_none());
        assert!(!update.should_close);
    }

    #[test]
    fn test_tp1_full_when_exit_pct_is_total() {
        let manager = SltpManager::new();
        let settings = SltpSettings::default();
        let mut s = state(
            Side::Buy,
            Decimal::from(100),
            Decimal::from(95),
            Decimal::from(110),
            Decimal::from(120),
        );
        s.tp1_exit_pct = Decimal::ONE_HUNDRED;
        let update = manager.update_trade(&mut s, Decimal::from(111), None, &settings);
        assert_eq!(update.close_reason, Some(CloseReason::TpFull));
        assert_eq!(s.quantity_remaining, Decimal::ZERO);
    }

    #[test]
    fn test_settings_validation() {
        assert!(SltpSettings::default().validate().is_ok());
        assert!(SltpSettings::for_profile(RiskProfile::Conservative).validate().is_ok());
        assert!(SltpSettings::for_profile(RiskProfile::Aggressive).validate().is_ok());

        let bad = SltpSettings {
            tp2_risk_reward: Decimal::ONE,
            ..SltpSettings::default()
        };
        assert!(bad.validate().is_err());

        let bad = SltpSettings {
            max_position_pct: Decimal::from(40),
            ..SltpSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_overrides_layer_on_profile() {
        let overrides = SltpOverrides {
            tp1_exit_pct: Some(Decimal::from(40)),
            sl_method: Some(StopLossMethod::Percent),
            ..SltpOverrides::default()
        };
        let settings = overrides.apply(SltpSettings::for_profile(RiskProfile::Aggressive));
        assert_eq!(settings.tp1_exit_pct, Decimal::from(40));
        assert_eq!(settings.sl_method, StopLossMethod::Percent);
        assert_eq!(settings.tp2_risk_reward, Decimal::from(4));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn dec(cents: u64) -> Decimal {
            Decimal::new(cents as i64, 2)
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 128,
                .. ProptestConfig::default()
            })]

            #[test]
            fn atr_stop_below_entry(entry in 100u64..10_000_000, atr in 1u64..5_000_000) {
                let manager = SltpManager::new();
                let settings = SltpSettings::default();
                let mut snapshot = snapshot_with_atr(100, 5);
                snapshot.indicators.atr = Some(dec(atr));

                let sl = manager.calculate_stop_loss(dec(entry), Side::Buy, Some(&snapshot), &settings);
                prop_assert!(sl < dec(entry));
                prop_assert!(sl > Decimal::ZERO);
            }

            #[test]
            fn targets_ordered(entry in 100u64..10_000_000, distance in 1u64..1_000_000) {
                let manager = SltpManager::new();
                let settings = SltpSettings::default();
                let tps = manager.calculate_take_profits(dec(entry), dec(distance), Side::Buy, &settings);
                prop_assert!(tps.tp1 > dec(entry));
                prop_assert!(tps.tp2 > tps.tp1);
            }

            #[test]
            fn position_cost_within_cap(
                portfolio in 1_000u64..100_000_000,
                entry in 1u64..10_000_000,
                stop_offset in 0u64..1_000_000,
                risk in 1u64..1_000,
                cap in 1u64..2_500,
            ) {
                let manager = SltpManager::new();
                let entry = dec(entry);
                let portfolio = dec(portfolio);
                let cap = dec(cap);
                let stop = (entry - dec(stop_offset)).max(Decimal::ZERO);

                let qty = manager.calculate_position_size_from_sl(portfolio, entry, stop, dec(risk), cap);
                prop_assert!(qty >= Decimal::ZERO);
                prop_assert!(qty * entry <= portfolio * cap / Decimal::ONE_HUNDRED);
            }

            #[test]
            fn phases_only_advance(steps in prop::collection::vec(0u64..500, 1..40)) {
                let manager = SltpManager::new();
                let settings = SltpSettings::default();
                let entry = Decimal::from(100);
                let mut s = state(Side::Buy, entry, Decimal::from(50), Decimal::from(100_000), Decimal::from(200_000));

                // Monotonically rising path: never stopped out, never reaches TP
                let mut price = entry;
                let mut previous_phase = s.phase;
                let mut previous_sl = s.sl_current;
                for step in steps {
                    price += dec(step);
                    let update = manager.update_trade(&mut s, price, None, &settings);
                    prop_assert!(!update.should_close);
                    prop_assert!(s.phase >= previous_phase);
                    prop_assert!(s.sl_current >= previous_sl);
                    previous_phase = s.phase;
                    previous_sl = s.sl_current;
                }
            }
        }
    }
}

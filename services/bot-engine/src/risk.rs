//! Pre-trade risk checks
//!
//! `RiskManager::validate_trade` runs a fixed sequence of checks and stops at
//! the first failure. Anything that is worth knowing but not worth blocking a
//! trade for is returned as a warning.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::market::MarketSnapshot;
use crate::symbols::parse_symbol;
use crate::types::Side;

/// Hard ceiling on a single position, in percent of portfolio value.
/// No configuration can raise it.
pub const MAX_POSITION_CEILING_PCT: Decimal = Decimal::from_parts(25, 0, 0, false, 0);

/// Configured risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max quote-currency cost of one trade
    #[serde(default = "default_max_trade_size")]
    pub max_trade_size: Decimal,
    /// Max bot-initiated trades per user per UTC day
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// Allowed quote currencies. Empty allows all.
    #[serde(default = "default_quote_whitelist")]
    pub quote_whitelist: Vec<String>,
    /// Denied symbols or base assets
    #[serde(default)]
    pub symbol_blacklist: Vec<String>,
    /// Stops farther than this percent from entry are tightened
    #[serde(default = "default_max_stop_distance_pct")]
    pub max_stop_distance_pct: Decimal,
    /// Targets below this reward:risk are widened
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: Decimal,
    /// ATR as percent of price above which a warning is attached
    #[serde(default = "default_volatility_warning_pct")]
    pub volatility_warning_pct: Decimal,
    /// Warn when a trade uses this percent of `max_trade_size` or more
    #[serde(default = "default_near_limit_pct")]
    pub near_limit_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_trade_size: default_max_trade_size(),
            max_daily_trades: default_max_daily_trades(),
            quote_whitelist: default_quote_whitelist(),
            symbol_blacklist: Vec::new(),
            max_stop_distance_pct: default_max_stop_distance_pct(),
            min_risk_reward: default_min_risk_reward(),
            volatility_warning_pct: default_volatility_warning_pct(),
            near_limit_pct: default_near_limit_pct(),
        }
    }
}

fn default_max_trade_size() -> Decimal { Decimal::from(1000) }
fn default_max_daily_trades() -> u32 { 20 }
fn default_quote_whitelist() -> Vec<String> {
    ["USDT", "USDC", "USD", "FDUSD", "BUSD"].iter().map(|q| q.to_string()).collect()
}
fn default_max_stop_distance_pct() -> Decimal { Decimal::from(10) }
fn default_min_risk_reward() -> Decimal { Decimal::ONE }
fn default_volatility_warning_pct() -> Decimal { Decimal::from(5) }
fn default_near_limit_pct() -> Decimal { Decimal::from(80) }

/// Who initiated the trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Bot,
    /// User-initiated; not counted against the daily bot limit
    Manual,
}

/// Portfolio facts the checks need, gathered by the caller
#[derive(Debug, Clone)]
pub struct TradeContext {
    /// Quote-currency cost of the proposed trade
    pub proposed_cost: Decimal,
    pub portfolio_value: Decimal,
    pub available_cash: Decimal,
    pub trades_today: u32,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub bot_id: Option<Uuid>,
}

/// Outcome of `validate_trade`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    /// Stop to use instead of the proposed one
    pub stop_loss: Option<Decimal>,
    /// Target to use instead of the proposed one
    pub take_profit: Option<Decimal>,
    /// Reduced quote-currency amount to trade
    pub adjusted_amount: Option<Decimal>,
}

impl ValidationResult {
    fn approved() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate a proposed trade. Order: sizing, daily count, symbol policy, cash.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_trade(
        &self,
        user: Uuid,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        source: TradeSource,
        context: &TradeContext,
        snapshot: Option<&MarketSnapshot>,
    ) -> ValidationResult {
        let result = self.run_checks(symbol, side, entry_price, source, context, snapshot);

        if result.allowed {
            debug!(
                user = %user,
                symbol,
                ?source,
                warnings = result.warnings.len(),
                "Trade validated: {} {} @ {}",
                side,
                context.proposed_cost,
                entry_price
            );
        } else {
            info!(
                user = %user,
                symbol,
                ?source,
                bot_id = ?context.bot_id,
                "Trade rejected: {}",
                result.reason.as_deref().unwrap_or("unspecified")
            );
        }
        result
    }

    fn run_checks(
        &self,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        source: TradeSource,
        context: &TradeContext,
        snapshot: Option<&MarketSnapshot>,
    ) -> ValidationResult {
        let limits = &self.limits;
        let cost = context.proposed_cost;

        // 1. Position sizing
        if entry_price <= Decimal::ZERO || cost <= Decimal::ZERO {
            return ValidationResult::rejected(format!("Invalid trade: price {} cost {}", entry_price, cost));
        }
        if cost > limits.max_trade_size {
            return ValidationResult::rejected(format!(
                "Trade size {} exceeds max trade size {}",
                cost, limits.max_trade_size
            ));
        }
        let ceiling = context.portfolio_value * MAX_POSITION_CEILING_PCT / Decimal::ONE_HUNDRED;
        if cost > ceiling {
            return ValidationResult::rejected(format!(
                "Trade size {} exceeds {}% of portfolio ({})",
                cost, MAX_POSITION_CEILING_PCT, ceiling
            ));
        }

        // 2. Daily trade count
        if source == TradeSource::Bot && context.trades_today >= limits.max_daily_trades {
            return ValidationResult::rejected(format!(
                "Daily trade limit reached ({}/{})",
                context.trades_today, limits.max_daily_trades
            ));
        }

        // 3. Symbol policy
        let Some(parts) = parse_symbol(symbol) else {
            return ValidationResult::rejected(format!("Unrecognised symbol: {}", symbol));
        };
        if !limits.quote_whitelist.is_empty()
            && !limits.quote_whitelist.iter().any(|q| q.eq_ignore_ascii_case(&parts.quote))
        {
            return ValidationResult::rejected(format!("Quote currency {} not allowed", parts.quote));
        }
        let canonical = parts.canonical();
        let denied = limits.symbol_blacklist.iter().any(|entry| {
            let entry = entry.to_uppercase();
            entry == parts.base
                || parse_symbol(&entry)
                    .map(|p| p.canonical() == canonical)
                    .unwrap_or(false)
        });
        if denied {
            return ValidationResult::rejected(format!("Symbol {} is blacklisted", canonical));
        }

        let mut result = ValidationResult::approved();

        // 4. Cash
        if cost > context.available_cash {
            if context.available_cash <= Decimal::ZERO {
                return ValidationResult::rejected("Insufficient cash");
            }
            result.adjusted_amount = Some(context.available_cash);
            result.warnings.push(format!(
                "Reduced trade from {} to available cash {}",
                cost, context.available_cash
            ));
        }

        self.attach_warnings(&mut result, entry_price, context, snapshot);
        self.attach_overrides(&mut result, side, entry_price, context);
        result
    }

    fn attach_warnings(
        &self,
        result: &mut ValidationResult,
        entry_price: Decimal,
        context: &TradeContext,
        snapshot: Option<&MarketSnapshot>,
    ) {
        let limits = &self.limits;

        if let Some(atr) = snapshot.and_then(|s| s.indicators.atr) {
            let volatility_pct = atr / entry_price * Decimal::ONE_HUNDRED;
            if volatility_pct > limits.volatility_warning_pct {
                result
                    .warnings
                    .push(format!("High volatility: ATR is {:.2}% of price", volatility_pct));
            }
        }

        let near_limit = limits.max_trade_size * limits.near_limit_pct / Decimal::ONE_HUNDRED;
        if context.proposed_cost >= near_limit {
            result.warnings.push(format!(
                "Trade size {} is near the limit {}",
                context.proposed_cost, limits.max_trade_size
            ));
        }

        if context.stop_loss.is_none() {
            result.warnings.push("No stop-loss proposed".to_string());
        }
    }

    /// Tighten a far stop, widen a poor target
    fn attach_overrides(&self, result: &mut ValidationResult, side: Side, entry: Decimal, context: &TradeContext) {
        let limits = &self.limits;

        let mut stop = context.stop_loss;
        if let Some(sl) = stop {
            let distance_pct = (entry - sl).abs() / entry * Decimal::ONE_HUNDRED;
            if distance_pct > limits.max_stop_distance_pct {
                let tightened = entry * (Decimal::ONE - side.sign() * limits.max_stop_distance_pct / Decimal::ONE_HUNDRED);
                result.stop_loss = Some(tightened);
                result.warnings.push(format!(
                    "Stop {} is {:.2}% away, tightened to {}",
                    sl, distance_pct, tightened
                ));
                stop = Some(tightened);
            }
        }

        if let (Some(sl), Some(tp)) = (stop, context.take_profit) {
            let risk = (entry - sl).abs();
            let reward = side.sign() * (tp - entry);
            if risk > Decimal::ZERO && reward < risk * limits.min_risk_reward {
                let widened = entry + side.sign() * risk * limits.min_risk_reward;
                result.take_profit = Some(widened);
                result.warnings.push(format!(
                    "Target {} below {}R, widened to {}",
                    tp, limits.min_risk_reward, widened
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(cost: i64) -> TradeContext {
        TradeContext {
            proposed_cost: Decimal::from(cost),
            portfolio_value: Decimal::from(10000),
            available_cash: Decimal::from(10000),
            trades_today: 0,
            stop_loss: Some(Decimal::from(95)),
            take_profit: Some(Decimal::from(110)),
            bot_id: None,
        }
    }

    fn validate(manager: &RiskManager, symbol: &str, ctx: &TradeContext) -> ValidationResult {
        manager.validate_trade(
            Uuid::new_v4(),
            symbol,
            Side::Buy,
            Decimal::from(100),
            TradeSource::Bot,
            ctx,
            None,
        )
    }

    #[test]
    fn test_oversized_trade_rejected() {
        let manager = RiskManager::default();
        let result = validate(&manager, "BTC/USDT", &context(3000));
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("max trade size"));
    }

    #[test]
    fn test_portfolio_ceiling() {
        let manager = RiskManager::new(RiskLimits {
            max_trade_size: Decimal::from(100_000),
            ..RiskLimits::default()
        });
        let result = validate(&manager, "BTC/USDT", &context(2600));
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("25%"));

        assert!(validate(&manager, "BTC/USDT", &context(2500)).allowed);
    }

    #[test]
    fn test_daily_limit_applies_to_bots_only() {
        let manager = RiskManager::default();
        let mut ctx = context(500);
        ctx.trades_today = 20;
        assert!(!validate(&manager, "BTC/USDT", &ctx).allowed);

        let manual = manager.validate_trade(
            Uuid::new_v4(),
            "BTC/USDT",
            Side::Buy,
            Decimal::from(100),
            TradeSource::Manual,
            &ctx,
            None,
        );
        assert!(manual.allowed);
    }

    #[test]
    fn test_symbol_policy() {
        let manager = RiskManager::new(RiskLimits {
            symbol_blacklist: vec!["DOGE".to_string(), "shib-usdt".to_string()],
            ..RiskLimits::default()
        });
        assert!(validate(&manager, "ETHUSDT", &context(500)).allowed);
        assert!(!validate(&manager, "ETH/EUR", &context(500)).allowed);
        assert!(!validate(&manager, "DOGE/USDT", &context(500)).allowed);
        assert!(!validate(&manager, "SHIBUSDT", &context(500)).allowed);
        assert!(!validate(&manager, "???", &context(500)).allowed);
    }

    #[test]
    fn test_checks_run_in_order() {
        // Oversized and blacklisted: sizing reason wins
        let manager = RiskManager::new(RiskLimits {
            symbol_blacklist: vec!["BTC".to_string()],
            ..RiskLimits::default()
        });
        let result = validate(&manager, "BTC/USDT", &context(3000));
        assert!(result.reason.unwrap().contains("max trade size"));
    }

    #[test]
    fn test_cash_clamp() {
        let manager = RiskManager::default();
        let mut ctx = context(500);
        ctx.available_cash = Decimal::from(200);
        let result = validate(&manager, "BTC/USDT", &ctx);
        assert!(result.allowed);
        assert_eq!(result.adjusted_amount, Some(Decimal::from(200)));

        ctx.available_cash = Decimal::ZERO;
        assert!(!validate(&manager, "BTC/USDT", &ctx).allowed);
    }

    #[test]
    fn test_warnings_do_not_block() {
        let manager = RiskManager::default();
        let mut ctx = context(900);
        ctx.stop_loss = None;
        let result = validate(&manager, "BTC/USDT", &ctx);
        assert!(result.allowed);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_far_stop_tightened_and_target_widened() {
        let manager = RiskManager::default();
        let mut ctx = context(500);
        ctx.stop_loss = Some(Decimal::from(80));
        ctx.take_profit = Some(Decimal::from(105));
        let result = validate(&manager, "BTC/USDT", &ctx);
        assert!(result.allowed);
        // 20% stop tightened to the 10% maximum, target widened to 1R of the new stop
        assert_eq!(result.stop_loss, Some(Decimal::from(90)));
        assert_eq!(result.take_profit, Some(Decimal::from(110)));
    }

    #[test]
    fn test_acceptable_levels_untouched() {
        let manager = RiskManager::default();
        let result = validate(&manager, "BTC/USDT", &context(500));
        assert!(result.allowed);
        assert!(result.stop_loss.is_none());
        assert!(result.take_profit.is_none());
        assert!(result.warnings.is_empty());
    }
}

//! Core domain types
//!
//! Entity shapes shared by the strategy, risk, SL/TP and engine layers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts. Multiplies a price move into PnL.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Strategy output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    None,
}

impl SignalDirection {
    pub fn as_side(&self) -> Option<Side> {
        match self {
            SignalDirection::Buy => Some(Side::Buy),
            SignalDirection::Sell => Some(Side::Sell),
            SignalDirection::None => None,
        }
    }
}

/// Bot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Idle => write!(f, "idle"),
            BotStatus::Running => write!(f, "running"),
            BotStatus::Paused => write!(f, "paused"),
            BotStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// SL/TP lifecycle phase. Ordered: a trade only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradePhase {
    /// Just opened, not yet confirmed by price
    #[default]
    Pending,
    /// Price moved past the validation threshold, stop at breakeven or better
    Validated,
    /// Profit threshold crossed, stop trails price
    Trailing,
}

impl std::fmt::Display for TradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradePhase::Pending => write!(f, "PENDING"),
            TradePhase::Validated => write!(f, "VALIDATED"),
            TradePhase::Trailing => write!(f, "TRAILING"),
        }
    }
}

/// Why (part of) a trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    SlHit,
    TpPartial,
    TpFull,
    StrategyExit,
    SignalReversal,
    BotStopped,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::SlHit => write!(f, "SL_HIT"),
            CloseReason::TpPartial => write!(f, "TP_PARTIAL"),
            CloseReason::TpFull => write!(f, "TP_FULL"),
            CloseReason::StrategyExit => write!(f, "STRATEGY_EXIT"),
            CloseReason::SignalReversal => write!(f, "SIGNAL_REVERSAL"),
            CloseReason::BotStopped => write!(f, "BOT_STOPPED"),
        }
    }
}

/// Aggregate bot statistics, recomputable from the closed-trade ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BotStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    /// Percentage of closed trades with positive realized PnL
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
}

impl BotStats {
    /// Fold one fully closed trade into the aggregates
    pub fn record_closed(&mut self, realized_pnl: Decimal) {
        self.total_trades += 1;
        if realized_pnl > Decimal::ZERO {
            self.winning_trades += 1;
        }
        self.total_pnl += realized_pnl;
        self.win_rate = Decimal::from(self.winning_trades) * Decimal::ONE_HUNDRED
            / Decimal::from(self.total_trades);
    }
}

/// A trading bot definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    pub strategy: String,
    pub symbols: Vec<String>,
    /// Raw per-bot configuration, parsed into `BotSettings` at activation
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_paper_trading")]
    pub paper_trading: bool,
    /// Percent of portfolio value put at risk per trade
    pub risk_percent: Decimal,
    #[serde(default)]
    pub status: BotStatus,
    #[serde(default)]
    pub stats: BotStats,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_paper_trading() -> bool {
    true
}

/// A persisted trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub owner: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub quantity_remaining: Decimal,
    pub status: TradeStatus,
    /// Current stop (moves with breakeven/trailing/TP1 ratchets)
    pub stop_loss_price: Decimal,
    pub initial_stop_loss: Decimal,
    /// TP1
    pub take_profit_price: Decimal,
    /// TP2
    pub take_profit_2: Decimal,
    /// Percent of the original quantity closed at TP1
    pub tp1_exit_pct: Decimal,
    pub trade_phase: TradePhase,
    pub tp1_partial_executed: bool,
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    /// Net realized PnL so far (fees included)
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    pub close_reason: Option<CloseReason>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Unrealized PnL of the remaining quantity at `price`
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.side.sign() * (price - self.entry_price) * self.quantity_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(TradePhase::Pending < TradePhase::Validated);
        assert!(TradePhase::Validated < TradePhase::Trailing);
    }

    #[test]
    fn test_stats_fold() {
        let mut stats = BotStats::default();
        stats.record_closed(Decimal::from(50));
        stats.record_closed(Decimal::from(-20));
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.win_rate, Decimal::from(50));
        assert_eq!(stats.total_pnl, Decimal::from(30));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&TradePhase::Trailing).unwrap(), "\"TRAILING\"");
        assert_eq!(serde_json::to_string(&CloseReason::TpPartial).unwrap(), "\"TP_PARTIAL\"");
        assert_eq!(serde_json::to_string(&BotStatus::Error).unwrap(), "\"ERROR\"");
    }
}

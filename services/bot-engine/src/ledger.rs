//! Stats reconciliation - recompute bot aggregates from the closed-trade ledger
//!
//! Incrementally maintained stats can drift (crash between writes, manual
//! edits). The closed trades are the source of truth.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::types::{BotStats, Trade};

/// Result of comparing stored stats with the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReconciliation {
    pub timestamp: DateTime<Utc>,
    pub stored: BotStats,
    pub recomputed: BotStats,
    pub discrepancies: Vec<StatsDiscrepancy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsDiscrepancy {
    pub field: &'static str,
    pub stored: String,
    pub ledger: String,
}

impl StatsReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Aggregate stats over fully closed trades. Partial-close PnL reaches the
/// account immediately but only counts here once the trade is closed.
pub fn recompute_stats(closed_trades: &[Trade]) -> BotStats {
    let mut stats = BotStats::default();
    for trade in closed_trades.iter().filter(|t| !t.is_open()) {
        stats.record_closed(trade.realized_pnl);
    }
    stats
}

/// Compare stored stats against the ledger
pub fn reconcile(stored: &BotStats, closed_trades: &[Trade]) -> StatsReconciliation {
    let recomputed = recompute_stats(closed_trades);
    let mut discrepancies = Vec::new();

    let mut check = |field: &'static str, stored: String, ledger: String| {
        if stored != ledger {
            discrepancies.push(StatsDiscrepancy { field, stored, ledger });
        }
    };
    check("total_trades", stored.total_trades.to_string(), recomputed.total_trades.to_string());
    check(
        "winning_trades",
        stored.winning_trades.to_string(),
        recomputed.winning_trades.to_string(),
    );
    check(
        "total_pnl",
        stored.total_pnl.normalize().to_string(),
        recomputed.total_pnl.normalize().to_string(),
    );
    check(
        "win_rate",
        stored.win_rate.round_dp(4).normalize().to_string(),
        recomputed.win_rate.round_dp(4).normalize().to_string(),
    );

    for d in &discrepancies {
        warn!("Stats discrepancy in {}: stored={}, ledger={}", d.field, d.stored, d.ledger);
    }
    if discrepancies.is_empty() {
        info!("Stats consistent with ledger ({} closed trades)", recomputed.total_trades);
    }

    StatsReconciliation {
        timestamp: Utc::now(),
        stored: stored.clone(),
        recomputed,
        discrepancies,
    }
}

/// Sum of realized PnL over closed trades
pub fn realized_total(closed_trades: &[Trade]) -> Decimal {
    closed_trades.iter().map(|t| t.realized_pnl).sum()
}

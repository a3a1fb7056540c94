//! Portfolio tracking - per-user cash, invested capital and trade accounting

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{CloseReason, Side, Trade, TradePhase, TradeStatus};

/// Paper trading account for one user. All bots of the user share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: Uuid,
    pub cash: Decimal,
    /// Cost basis of the open remainder of every trade
    pub invested: Decimal,
    pub realized_pnl: Decimal,
    pub starting_balance: Decimal,
    /// Bot-initiated trades opened on `trades_date`
    pub trades_today: u32,
    pub trades_date: NaiveDate,
    pub last_updated: DateTime<Utc>,
}

/// Account snapshot for reporting
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    pub invested: Decimal,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
    pub return_pct: Decimal,
}

impl Account {
    /// Create new account with starting cash
    pub fn new(owner: Uuid, starting_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            owner,
            cash: starting_balance,
            invested: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            starting_balance,
            trades_today: 0,
            trades_date: now.date_naive(),
            last_updated: now,
        }
    }

    /// Cash plus the cost basis of open positions
    pub fn equity(&self) -> Decimal {
        self.cash + self.invested
    }

    /// Trades counted for `now`'s UTC day; a new day starts from zero
    pub fn trades_on(&self, now: DateTime<Utc>) -> u32 {
        if self.trades_date == now.date_naive() {
            self.trades_today
        } else {
            0
        }
    }

    fn count_trade(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.trades_date != today {
            debug!("Daily trade counter reset for {} ({} -> {})", self.owner, self.trades_date, today);
            self.trades_date = today;
            self.trades_today = 0;
        }
        self.trades_today += 1;
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        let return_pct = if self.starting_balance.is_zero() {
            Decimal::ZERO
        } else {
            (self.equity() - self.starting_balance) / self.starting_balance * Decimal::ONE_HUNDRED
        };

        AccountSnapshot {
            cash: self.cash,
            invested: self.invested,
            equity: self.equity(),
            realized_pnl: self.realized_pnl,
            return_pct,
        }
    }
}

/// A filled entry order, ready to be booked
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub bot_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub fill_price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Decimal,
    pub tp1_exit_pct: Decimal,
}

/// Book an entry: builds the OPEN trade and debits the account.
/// Cash pays for the position plus commission.
pub fn open_trade(account: &mut Account, fill: &EntryFill, now: DateTime<Utc>) -> Trade {
    let cost = fill.fill_price * fill.quantity;
    account.cash -= cost + fill.commission;
    account.invested += cost;
    account.realized_pnl -= fill.commission;
    account.last_updated = now;
    account.count_trade(now);

    info!(
        "Opened {} {} {} @ {} | SL {} TP1 {} TP2 {}",
        fill.side, fill.quantity, fill.symbol, fill.fill_price, fill.stop_loss, fill.take_profit_1, fill.take_profit_2
    );

    Trade {
        id: Uuid::new_v4(),
        bot_id: fill.bot_id,
        owner: account.owner,
        symbol: fill.symbol.clone(),
        side: fill.side,
        entry_price: fill.fill_price,
        exit_price: None,
        quantity: fill.quantity,
        quantity_remaining: fill.quantity,
        status: TradeStatus::Open,
        stop_loss_price: fill.stop_loss,
        initial_stop_loss: fill.stop_loss,
        take_profit_price: fill.take_profit_1,
        take_profit_2: fill.take_profit_2,
        tp1_exit_pct: fill.tp1_exit_pct,
        trade_phase: TradePhase::Pending,
        tp1_partial_executed: false,
        highest_price: fill.fill_price,
        lowest_price: fill.fill_price,
        realized_pnl: -fill.commission,
        fees: fill.commission,
        close_reason: None,
        opened_at: now,
        closed_at: None,
    }
}

/// Result of booking (part of) a close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseOutcome {
    /// Net PnL of this close (after its commission)
    pub net_pnl: Decimal,
    /// True when nothing of the trade remains open
    pub fully_closed: bool,
}

/// Book a (partial) close. Cash receives the cost basis of the closed
/// quantity plus its net PnL, so shorts settle symmetrically.
pub fn close_trade(
    account: &mut Account,
    trade: &mut Trade,
    quantity: Decimal,
    fill_price: Decimal,
    commission: Decimal,
    reason: CloseReason,
    now: DateTime<Utc>,
) -> CloseOutcome {
    let quantity = quantity.min(trade.quantity_remaining);
    let cost_basis = trade.entry_price * quantity;
    let gross = trade.side.sign() * (fill_price - trade.entry_price) * quantity;
    let net_pnl = gross - commission;

    account.cash += cost_basis + net_pnl;
    account.invested -= cost_basis;
    account.realized_pnl += net_pnl;
    account.last_updated = now;

    trade.quantity_remaining -= quantity;
    trade.realized_pnl += net_pnl;
    trade.fees += commission;
    trade.exit_price = Some(fill_price);
    trade.close_reason = Some(reason);

    let fully_closed = trade.quantity_remaining <= Decimal::ZERO;
    if fully_closed {
        trade.quantity_remaining = Decimal::ZERO;
        trade.status = TradeStatus::Closed;
        trade.closed_at = Some(now);
    }

    info!(
        "Closed {} {} {} @ {} ({}) | PnL {} | remaining {}",
        quantity, trade.symbol, trade.side, fill_price, reason, net_pnl, trade.quantity_remaining
    );

    CloseOutcome { net_pnl, fully_closed }
}

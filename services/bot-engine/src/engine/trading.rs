//! Per-symbol trading path: manage open trades, then look for an entry

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ActiveBot, BotEngine};
use crate::broker::{Broker, OrderRequest};
use crate::error::{EngineError, MarketDataError, Result};
use crate::market::MarketSnapshot;
use crate::portfolio::{self, CloseOutcome, EntryFill};
use crate::risk::{TradeContext, TradeSource};
use crate::sltp::{TakeProfits, TradeState};
use crate::store::StoreTx;
use crate::symbols::truncate_quantity;
use crate::types::{CloseReason, Side, SignalDirection, Trade};

/// Entry levels before risk overrides
struct EntryLevels {
    stop_loss: Decimal,
    take_profits: TakeProfits,
}

impl BotEngine {
    pub(super) async fn process_symbol(&self, bot: &ActiveBot, symbol: &str) -> Result<()> {
        let snapshot = self.snapshot(symbol).await?;
        let price = snapshot.close;
        let signal = bot.strategy.get_signal_direction(&snapshot);
        debug!(bot_id = %bot.bot_id, symbol, "Signal {:?} @ {}", signal, price);

        let open = self.ctx.store.open_trades(bot.bot_id, Some(symbol)).await?;
        let had_open = !open.is_empty();
        for trade in open {
            self.manage_trade(bot, trade, price, &snapshot, signal).await?;
        }

        // One position per bot and symbol
        if !had_open {
            self.maybe_open(bot, symbol, signal, &snapshot).await?;
        }
        Ok(())
    }

    /// Candles plus the latest quote, both bounded by the market data timeout
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let settings = &self.ctx.settings;
        let candles = self
            .bounded(symbol, self.ctx.market.get_candles(symbol, settings.candle_interval, settings.candle_limit))
            .await?;
        let price = self.bounded(symbol, self.ctx.market.get_latest_price(symbol)).await?;

        MarketSnapshot::build(symbol, candles, self.ctx.indicators.as_ref(), &settings.indicators)
            .map(|snapshot| snapshot.with_price(price))
            .ok_or_else(|| {
                EngineError::market_data(symbol, MarketDataError::Transient("no candles returned".to_string()))
            })
    }

    async fn bounded<T>(
        &self,
        symbol: &str,
        request: impl Future<Output = std::result::Result<T, MarketDataError>>,
    ) -> Result<T> {
        let timeout = self.ctx.settings.market_data_timeout();
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result.map_err(|e| EngineError::market_data(symbol, e)),
            Err(_) => Err(EngineError::market_data(
                symbol,
                MarketDataError::Transient(format!("request timed out after {:?}", timeout)),
            )),
        }
    }

    /// SL/TP first, then the strategy's own exit, then signal reversal.
    /// At most one close per trade per tick.
    async fn manage_trade(
        &self,
        bot: &ActiveBot,
        trade: Trade,
        price: Decimal,
        snapshot: &MarketSnapshot,
        signal: SignalDirection,
    ) -> Result<()> {
        let mut state = TradeState::from(&trade);
        let update = self.ctx.sltp.update_trade(&mut state, price, Some(snapshot), &bot.settings.sltp);

        if let Some(message) = &update.log_message {
            info!(bot_id = %bot.bot_id, trade_id = %trade.id, "{}", message);
        }

        if update.should_close {
            let reason = update.close_reason.unwrap_or(CloseReason::SlHit);
            let closed = self
                .close_position(&bot.broker, trade.id, Some(&state), update.close_quantity, price, reason)
                .await?;
            if closed.is_none() {
                // Unfilled: keep this tick's stop, phase and extremes, but not the partial
                if let Some(stop) = update.stop_before_partial {
                    state.revert_partial(stop);
                }
                self.persist_state(trade, &state).await?;
            }
            return Ok(());
        }

        let mut trade = trade;
        if update.is_change() || state.highest_price != trade.highest_price || state.lowest_price != trade.lowest_price
        {
            if !self.persist_state(trade.clone(), &state).await? {
                return Ok(());
            }
            state.write_to(&mut trade);
            if let (Some(sl), Some(phase)) = (update.new_sl, update.new_phase) {
                info!(trade_id = %trade.id, "Phase {} with stop {}", phase, sl);
            }
        }

        let exit = bot.strategy.should_exit(&trade, price, snapshot);
        if exit.should_exit {
            info!(bot_id = %bot.bot_id, trade_id = %trade.id, "Strategy exit: {}", exit.reason);
            self.close_position(&bot.broker, trade.id, None, trade.quantity_remaining, price, CloseReason::StrategyExit)
                .await?;
            return Ok(());
        }

        if signal.as_side() == Some(trade.side.opposite()) {
            info!(bot_id = %bot.bot_id, trade_id = %trade.id, "Signal reversed to {:?}", signal);
            self.close_position(
                &bot.broker,
                trade.id,
                None,
                trade.quantity_remaining,
                price,
                CloseReason::SignalReversal,
            )
            .await?;
        }
        Ok(())
    }

    /// Write managed state onto a still-open trade. False when the trade was
    /// closed concurrently.
    async fn persist_state(&self, mut trade: Trade, state: &TradeState) -> Result<bool> {
        state.write_to(&mut trade);
        let trade_id = trade.id;
        match self.ctx.store.apply(StoreTx::new().trade(trade).expect_open(trade_id)).await {
            Ok(()) => Ok(true),
            Err(EngineError::Conflict(id)) => {
                debug!(trade_id = %id, "Trade closed concurrently, skipping update");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Close `quantity` of a trade at market. Re-reads the trade under the
    /// owner's lock; a trade that is no longer open is left alone and
    /// `Ok(None)` is returned.
    pub(super) async fn close_position(
        &self,
        broker: &Arc<dyn Broker>,
        trade_id: Uuid,
        state: Option<&TradeState>,
        quantity: Decimal,
        price: Decimal,
        reason: CloseReason,
    ) -> Result<Option<CloseOutcome>> {
        let Some(mut trade) = self.ctx.store.get_trade(trade_id).await? else {
            return Err(EngineError::TradeNotFound(trade_id));
        };
        let _guard = self.user_locks.acquire(&trade.owner).await;

        // Re-read under the lock
        trade = match self.ctx.store.get_trade(trade_id).await? {
            Some(current) if current.is_open() => current,
            _ => {
                debug!(trade_id = %trade_id, "Trade already closed, nothing to do");
                return Ok(None);
            }
        };

        if let Some(state) = state {
            state.write_to(&mut trade);
        }

        let quantity = quantity.min(trade.quantity_remaining);
        if quantity <= Decimal::ZERO {
            return Ok(None);
        }

        let order = OrderRequest::market(&trade.symbol, trade.side.opposite(), quantity, price);
        let fill = broker.place_order(order).await?;
        if !fill.is_filled() {
            warn!(trade_id = %trade_id, "Close order not filled ({:?}), retrying next tick", fill.status);
            return Ok(None);
        }

        let mut account = self
            .ctx
            .store
            .get_account(trade.owner)
            .await?
            .ok_or_else(|| EngineError::Persistence(format!("no account for {}", trade.owner)))?;

        let now = Utc::now();
        let outcome = portfolio::close_trade(
            &mut account,
            &mut trade,
            fill.filled_quantity,
            fill.fill_price,
            fill.commission,
            reason,
            now,
        );

        let mut tx = StoreTx::new().trade(trade.clone()).account(account).expect_open(trade_id);
        if outcome.fully_closed {
            let mut bot = self
                .ctx
                .store
                .get_bot(trade.bot_id)
                .await?
                .ok_or(EngineError::BotNotFound(trade.bot_id))?;
            bot.stats.record_closed(trade.realized_pnl);
            tx = tx.bot(bot);
        }

        match self.ctx.store.apply(tx).await {
            Ok(()) => Ok(Some(outcome)),
            Err(EngineError::Conflict(id)) => {
                warn!(trade_id = %id, "Trade closed concurrently, discarding close");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn maybe_open(
        &self,
        bot: &ActiveBot,
        symbol: &str,
        signal: SignalDirection,
        snapshot: &MarketSnapshot,
    ) -> Result<()> {
        let Some(side) = signal.as_side() else {
            return Ok(());
        };
        if side == Side::Sell && !bot.settings.allow_short {
            debug!(bot_id = %bot.bot_id, symbol, "Sell signal ignored, shorting disabled");
            return Ok(());
        }

        let _guard = self.user_locks.acquire(&bot.owner).await;
        let mut account = match self.ctx.store.get_account(bot.owner).await? {
            Some(account) => account,
            None => portfolio::Account::new(bot.owner, self.ctx.settings.paper.starting_balance),
        };

        let price = snapshot.close;
        let sltp = &bot.settings.sltp;
        let mut levels = self.entry_levels(bot, price, side, snapshot);

        let mut quantity = self.ctx.sltp.calculate_position_size_from_sl(
            account.equity(),
            price,
            levels.stop_loss,
            bot.settings.risk_percent,
            sltp.max_position_pct,
        );
        if quantity <= Decimal::ZERO {
            debug!(bot_id = %bot.bot_id, symbol, "Position size rounds to zero, no entry");
            return Ok(());
        }
        // Risk-first size, held inside the per-trade cost limit
        let max_quantity = truncate_quantity(self.ctx.risk.limits().max_trade_size / price);
        if quantity > max_quantity {
            debug!(bot_id = %bot.bot_id, symbol, "Size {} capped to {} by max trade size", quantity, max_quantity);
            quantity = max_quantity;
        }
        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        let now = Utc::now();
        let context = TradeContext {
            proposed_cost: quantity * price,
            portfolio_value: account.equity(),
            available_cash: account.cash * (Decimal::ONE - self.ctx.cash_buffer()),
            trades_today: account.trades_on(now),
            stop_loss: Some(levels.stop_loss),
            take_profit: Some(levels.take_profits.tp1),
            bot_id: Some(bot.bot_id),
        };
        let validation = self.ctx.risk.validate_trade(
            bot.owner,
            symbol,
            side,
            price,
            TradeSource::Bot,
            &context,
            Some(snapshot),
        );
        if !validation.allowed {
            return Ok(());
        }
        for warning in &validation.warnings {
            warn!(bot_id = %bot.bot_id, symbol, "Risk warning: {}", warning);
        }

        if let Some(stop_loss) = validation.stop_loss {
            levels.stop_loss = stop_loss;
            if validation.take_profit.is_none() {
                levels.take_profits =
                    self.ctx
                        .sltp
                        .calculate_take_profits(price, (price - stop_loss).abs(), side, sltp);
            }
        }
        if let Some(tp1) = validation.take_profit {
            levels.take_profits = scale_targets(price, tp1, side, sltp.tp1_risk_reward, sltp.tp2_risk_reward);
        }
        if let Some(amount) = validation.adjusted_amount {
            quantity = quantity.min(truncate_quantity(amount / price));
            if quantity <= Decimal::ZERO {
                return Ok(());
            }
        }

        let order = OrderRequest::market(symbol, side, quantity, price);
        let fill = bot.broker.place_order(order).await?;
        if !fill.is_filled() {
            warn!(bot_id = %bot.bot_id, symbol, "Entry order not filled ({:?})", fill.status);
            return Ok(());
        }

        let entry = EntryFill {
            bot_id: bot.bot_id,
            symbol: symbol.to_string(),
            side,
            fill_price: fill.fill_price,
            quantity: fill.filled_quantity,
            commission: fill.commission,
            stop_loss: levels.stop_loss,
            take_profit_1: levels.take_profits.tp1,
            take_profit_2: levels.take_profits.tp2,
            tp1_exit_pct: sltp.tp1_exit_pct,
        };
        let trade = portfolio::open_trade(&mut account, &entry, now);
        info!(
            bot_id = %bot.bot_id,
            trade_id = %trade.id,
            "Entered {} {} {} @ {}",
            side,
            trade.quantity,
            symbol,
            trade.entry_price
        );
        self.ctx.store.apply(StoreTx::new().trade(trade).account(account)).await
    }

    /// Initial SL and targets: the strategy's own levels when configured and
    /// on the correct side of entry, otherwise the SL/TP manager's.
    fn entry_levels(&self, bot: &ActiveBot, price: Decimal, side: Side, snapshot: &MarketSnapshot) -> EntryLevels {
        let sltp = &bot.settings.sltp;

        if bot.settings.use_strategy_levels {
            let stop_loss = bot.strategy.get_stop_loss(price, side, snapshot);
            let tp1 = bot.strategy.get_take_profit(price, side, snapshot);
            let stop_ok = stop_loss > Decimal::ZERO && side.sign() * (price - stop_loss) > Decimal::ZERO;
            let target_ok = side.sign() * (tp1 - price) > Decimal::ZERO;
            if stop_ok && target_ok {
                return EntryLevels {
                    stop_loss,
                    take_profits: scale_targets(price, tp1, side, sltp.tp1_risk_reward, sltp.tp2_risk_reward),
                };
            }
            warn!(
                bot_id = %bot.bot_id,
                "Strategy levels SL {} / TP {} invalid for {} @ {}, using SL/TP manager",
                stop_loss,
                tp1,
                side,
                price
            );
        }

        let stop_loss = self.ctx.sltp.calculate_stop_loss(price, side, Some(snapshot), sltp);
        let take_profits = self
            .ctx
            .sltp
            .calculate_take_profits(price, (price - stop_loss).abs(), side, sltp);
        EntryLevels { stop_loss, take_profits }
    }
}

/// TP2 keeps the configured TP2:TP1 reward ratio relative to a given TP1
fn scale_targets(entry: Decimal, tp1: Decimal, side: Side, tp1_rr: Decimal, tp2_rr: Decimal) -> TakeProfits {
    let distance = (tp1 - entry).abs();
    let ratio = if tp1_rr > Decimal::ZERO { tp2_rr / tp1_rr } else { Decimal::TWO };
    TakeProfits {
        tp1,
        tp2: entry + side.sign() * distance * ratio,
    }
}

//! Bot Engine - Orchestrates strategies, risk checks and SL/TP management
//!
//! Lifecycle:
//! 1. `activate_bot` parses and validates the bot's configuration, resolves
//!    its strategy and broker, and adds it to the active set
//! 2. `tick` evaluates every active bot in its own task; one bot failing
//!    (error or panic) moves only that bot to ERROR
//! 3. `pause_bot` stops management and keeps positions; `deactivate_bot`
//!    force-closes positions at market

mod trading;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, PaperBroker};
use crate::config::{BotSettings, EngineSettings};
use crate::error::{BrokerError, ConfigError, EngineError, MarketDataError, Result};
use crate::indicators::{IndicatorLibrary, StandardIndicators};
use crate::ledger::{self, StatsReconciliation};
use crate::locks::KeyedLocks;
use crate::market::MarketDataProvider;
use crate::portfolio::Account;
use crate::risk::RiskManager;
use crate::sltp::SltpManager;
use crate::store::Store;
use crate::strategy::{Strategy, StrategyRegistry};
use crate::types::{Bot, BotStatus, CloseReason, Side, Trade, TradePhase};

/// Everything the engine depends on, built once at startup
pub struct AppContext {
    pub settings: EngineSettings,
    pub store: Arc<dyn Store>,
    pub market: Arc<dyn MarketDataProvider>,
    pub indicators: Arc<dyn IndicatorLibrary>,
    pub paper_broker: Arc<dyn Broker>,
    pub live_broker: Option<Arc<dyn Broker>>,
    pub risk: RiskManager,
    pub sltp: SltpManager,
    pub registry: StrategyRegistry,
}

impl AppContext {
    /// Context with the built-in strategies, standard indicators and a paper broker from `settings`
    pub fn new(settings: EngineSettings, store: Arc<dyn Store>, market: Arc<dyn MarketDataProvider>) -> Self {
        let paper_broker = Arc::new(PaperBroker::new(
            settings.paper.commission_bps,
            settings.paper.max_slippage_bps,
        ));

        Self {
            risk: RiskManager::new(settings.risk.clone()),
            sltp: SltpManager::new(),
            registry: StrategyRegistry::builtin(),
            indicators: Arc::new(StandardIndicators),
            paper_broker,
            live_broker: None,
            settings,
            store,
            market,
        }
    }

    pub fn with_live_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.live_broker = Some(broker);
        self
    }

    pub fn with_paper_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.paper_broker = broker;
        self
    }

    pub fn with_indicators(mut self, indicators: Arc<dyn IndicatorLibrary>) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Broker for a bot; live bots require a configured live broker
    fn broker_for(&self, bot: &Bot) -> std::result::Result<Arc<dyn Broker>, ConfigError> {
        if bot.paper_trading {
            return Ok(self.paper_broker.clone());
        }
        self.live_broker
            .clone()
            .ok_or_else(|| ConfigError::Invalid("live trading requested but no live broker is configured".to_string()))
    }

    /// Cash kept back from sizing so commission and slippage cannot overdraw the account
    fn cash_buffer(&self) -> Decimal {
        let bps = self.settings.paper.commission_bps + self.settings.paper.max_slippage_bps;
        Decimal::from(bps) / Decimal::from(10_000)
    }
}

/// Runtime state of an activated bot
#[derive(Clone)]
pub(crate) struct ActiveBot {
    pub bot_id: Uuid,
    pub owner: Uuid,
    pub name: String,
    pub symbols: Vec<String>,
    pub strategy: Arc<dyn Strategy>,
    pub settings: BotSettings,
    pub broker: Arc<dyn Broker>,
    pub last_check: Option<DateTime<Utc>>,
}

/// Result of one isolated bot tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// Transient failure, retried next tick
    Skipped(String),
    /// Bot moved to ERROR
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub processed: usize,
    pub skipped: Vec<(Uuid, String)>,
    pub failed: Vec<(Uuid, String)>,
}

/// Engine status for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub timestamp: DateTime<Utc>,
    pub active_bots: usize,
    pub ticks: u64,
    pub bots: Vec<BotStatusReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatusReport {
    pub bot_id: Uuid,
    pub name: String,
    pub strategy: String,
    pub last_check: Option<DateTime<Utc>>,
    pub open_trades: Vec<OpenTradeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenTradeReport {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub phase: TradePhase,
    pub stop_loss: Decimal,
    pub quantity_remaining: Decimal,
}

pub struct BotEngine {
    ctx: Arc<AppContext>,
    active: RwLock<HashMap<Uuid, ActiveBot>>,
    /// Single writer per user portfolio
    user_locks: KeyedLocks<Uuid>,
    /// One evaluation of a bot's trades at a time
    bot_locks: KeyedLocks<Uuid>,
    ticks: AtomicU64,
}

impl BotEngine {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            active: RwLock::new(HashMap::new()),
            user_locks: KeyedLocks::new(),
            bot_locks: KeyedLocks::new(),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub async fn active_bot_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.active.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn is_active(&self, bot_id: Uuid) -> bool {
        self.active.read().await.contains_key(&bot_id)
    }

    async fn load_bot(&self, bot_id: Uuid) -> Result<Bot> {
        self.ctx
            .store
            .get_bot(bot_id)
            .await?
            .ok_or(EngineError::BotNotFound(bot_id))
    }

    /// Validate configuration and start managing the bot.
    /// Configuration problems put the bot in ERROR and are returned.
    pub async fn activate_bot(&self, bot_id: Uuid) -> Result<()> {
        let mut bot = self.load_bot(bot_id).await?;

        let prepared = BotSettings::from_bot(&bot).and_then(|settings| {
            let strategy = self.ctx.registry.create(&bot.strategy, &settings.strategy_params)?;
            let broker = self.ctx.broker_for(&bot)?;
            Ok((settings, strategy, broker))
        });

        let (settings, strategy, broker) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(bot_id = %bot_id, "Activation failed: {}", e);
                self.active.write().await.remove(&bot_id);
                bot.status = BotStatus::Error;
                bot.last_error = Some(e.to_string());
                self.ctx.store.save_bot(&bot).await?;
                return Err(e.into());
            }
        };

        self.ensure_account(bot.owner).await?;
        self.reconcile_stats(bot_id).await?;

        // Re-read: reconciliation may have healed the stats
        let mut bot = self.load_bot(bot_id).await?;
        bot.status = BotStatus::Running;
        bot.last_error = None;
        self.ctx.store.save_bot(&bot).await?;

        info!(
            bot_id = %bot_id,
            "Activated bot '{}' ({}) on {:?} [{}]",
            bot.name,
            strategy.name(),
            bot.symbols,
            if broker.is_paper() { "paper" } else { "live" }
        );

        self.active.write().await.insert(
            bot_id,
            ActiveBot {
                bot_id,
                owner: bot.owner,
                name: bot.name.clone(),
                symbols: bot.symbols.clone(),
                strategy,
                settings,
                broker,
                last_check: None,
            },
        );
        Ok(())
    }

    /// Stop managing the bot; open positions stay open
    pub async fn pause_bot(&self, bot_id: Uuid) -> Result<()> {
        self.active.write().await.remove(&bot_id);
        // Let an in-flight tick finish before touching the record
        let _guard = self.bot_locks.acquire(&bot_id).await;

        let mut bot = self.load_bot(bot_id).await?;
        bot.status = BotStatus::Paused;
        self.ctx.store.save_bot(&bot).await?;
        info!(bot_id = %bot_id, "Paused bot '{}'", bot.name);
        Ok(())
    }

    /// Stop the bot and close every open position at market. Every trade is
    /// attempted; if any close fails the bot is left in ERROR with the
    /// remaining positions open and the first failure is returned.
    pub async fn deactivate_bot(&self, bot_id: Uuid) -> Result<usize> {
        let removed = self.active.write().await.remove(&bot_id);
        let _guard = self.bot_locks.acquire(&bot_id).await;

        let bot = self.load_bot(bot_id).await?;
        let open = self.ctx.store.open_trades(bot_id, None).await?;

        let mut closed = 0;
        let mut failures: Vec<EngineError> = Vec::new();
        if !open.is_empty() {
            let broker = match removed {
                Some(active) => Ok(active.broker),
                None => self.ctx.broker_for(&bot).map_err(EngineError::from),
            };
            match broker {
                Ok(broker) => {
                    for trade in open {
                        match self.force_close(&broker, &trade).await {
                            Ok(true) => closed += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!(bot_id = %bot_id, trade_id = %trade.id, "Force close failed: {}", e);
                                failures.push(e);
                            }
                        }
                    }
                }
                Err(e) => failures.push(e),
            }
        }

        let mut bot = self.load_bot(bot_id).await?;
        let mut failures = failures.into_iter();
        if let Some(first) = failures.next() {
            let remaining = failures.count();
            bot.status = BotStatus::Error;
            bot.last_error = Some(format!(
                "deactivation incomplete, closed {} trades: {} ({} more failures)",
                closed, first, remaining
            ));
            self.ctx.store.save_bot(&bot).await?;
            error!(bot_id = %bot_id, "Deactivation of '{}' incomplete: {}", bot.name, first);
            return Err(first);
        }

        bot.status = BotStatus::Idle;
        bot.last_error = None;
        self.ctx.store.save_bot(&bot).await?;
        info!(bot_id = %bot_id, "Deactivated bot '{}', closed {} trades", bot.name, closed);
        Ok(closed)
    }

    async fn force_close(&self, broker: &Arc<dyn Broker>, trade: &Trade) -> Result<bool> {
        let price = self.latest_price(&trade.symbol).await?;
        let outcome = self
            .close_position(broker, trade.id, None, trade.quantity_remaining, price, CloseReason::BotStopped)
            .await?;
        if outcome.is_some() {
            return Ok(true);
        }
        // Nothing closed: fine if the trade is already gone, an error if the order did not fill
        match self.ctx.store.get_trade(trade.id).await? {
            Some(current) if current.is_open() => Err(EngineError::Broker(BrokerError::Rejected(format!(
                "close of trade {} not filled",
                trade.id
            )))),
            _ => Ok(false),
        }
    }

    /// One monitoring pass over every active bot. Bots run concurrently,
    /// each in its own task.
    pub async fn tick(self: &Arc<Self>) -> TickSummary {
        let ids = self.active_bot_ids().await;
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let engine = Arc::clone(self);
                (id, tokio::spawn(async move { engine.tick_bot(id).await }))
            })
            .collect();

        let mut summary = TickSummary::default();
        for (id, handle) in handles {
            match self.settle(id, handle.await).await {
                TickOutcome::Completed => summary.processed += 1,
                TickOutcome::Skipped(reason) => summary.skipped.push((id, reason)),
                TickOutcome::Failed(reason) => summary.failed.push((id, reason)),
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.user_locks.cleanup();
        self.bot_locks.cleanup();
        summary
    }

    /// Tick a single bot in its own task with the same fault isolation as `tick`
    pub async fn run_isolated(self: &Arc<Self>, bot_id: Uuid) -> TickOutcome {
        let engine = Arc::clone(self);
        let result = tokio::spawn(async move { engine.tick_bot(bot_id).await }).await;
        self.settle(bot_id, result).await
    }

    async fn settle(&self, bot_id: Uuid, result: std::result::Result<Result<()>, JoinError>) -> TickOutcome {
        let reason = match result {
            Ok(Ok(())) => return TickOutcome::Completed,
            Ok(Err(e)) if e.is_transient() => {
                warn!(bot_id = %bot_id, "Skipping tick: {}", e);
                return TickOutcome::Skipped(e.to_string());
            }
            Ok(Err(e)) => e.to_string(),
            Err(join_error) if join_error.is_panic() => format!("panic during tick: {}", join_error),
            Err(join_error) => format!("tick task cancelled: {}", join_error),
        };

        error!(bot_id = %bot_id, "Bot failed: {}", reason);
        if let Err(e) = self.mark_error(bot_id, &reason).await {
            error!(bot_id = %bot_id, "Failed to record bot error: {}", e);
        }
        TickOutcome::Failed(reason)
    }

    async fn mark_error(&self, bot_id: Uuid, reason: &str) -> Result<()> {
        self.active.write().await.remove(&bot_id);
        let _guard = self.bot_locks.acquire(&bot_id).await;
        let mut bot = self.load_bot(bot_id).await?;
        bot.status = BotStatus::Error;
        bot.last_error = Some(reason.to_string());
        self.ctx.store.save_bot(&bot).await
    }

    /// Evaluate one bot: every symbol, open trades first, then entries
    pub async fn tick_bot(&self, bot_id: Uuid) -> Result<()> {
        let _guard = self.bot_locks.acquire(&bot_id).await;

        // Paused or deactivated while waiting for the lock
        let Some(active) = self.active.read().await.get(&bot_id).cloned() else {
            return Ok(());
        };

        let mut transient: Option<EngineError> = None;
        for symbol in &active.symbols {
            match self.process_symbol(&active, symbol).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    warn!(bot_id = %bot_id, symbol = %symbol, "Skipping symbol this tick: {}", e);
                    transient.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(bot) = self.active.write().await.get_mut(&bot_id) {
            bot.last_check = Some(Utc::now());
        }

        match transient {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Recompute stats from closed trades and overwrite drifted aggregates
    pub async fn reconcile_stats(&self, bot_id: Uuid) -> Result<StatsReconciliation> {
        let mut bot = self.load_bot(bot_id).await?;
        let closed = self.ctx.store.closed_trades(bot_id).await?;
        let result = ledger::reconcile(&bot.stats, &closed);

        if !result.is_consistent() {
            warn!(bot_id = %bot_id, "Healing {} drifted stats fields", result.discrepancies.len());
            bot.stats = result.recomputed.clone();
            self.ctx.store.save_bot(&bot).await?;
        }
        Ok(result)
    }

    /// Reconcile every active bot, serialised with its ticks
    pub async fn reconcile_all(&self) -> usize {
        let mut healed = 0;
        for bot_id in self.active_bot_ids().await {
            let _guard = self.bot_locks.acquire(&bot_id).await;
            match self.reconcile_stats(bot_id).await {
                Ok(result) if !result.is_consistent() => healed += 1,
                Ok(_) => {}
                Err(e) => warn!(bot_id = %bot_id, "Stats reconciliation failed: {}", e),
            }
        }
        healed
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let active: Vec<ActiveBot> = self.active.read().await.values().cloned().collect();

        let mut bots = Vec::with_capacity(active.len());
        for bot in active {
            let open_trades = self
                .ctx
                .store
                .open_trades(bot.bot_id, None)
                .await?
                .into_iter()
                .map(|t| OpenTradeReport {
                    trade_id: t.id,
                    symbol: t.symbol,
                    side: t.side,
                    phase: t.trade_phase,
                    stop_loss: t.stop_loss_price,
                    quantity_remaining: t.quantity_remaining,
                })
                .collect();

            bots.push(BotStatusReport {
                bot_id: bot.bot_id,
                name: bot.name,
                strategy: bot.strategy.name().to_string(),
                last_check: bot.last_check,
                open_trades,
            });
        }
        bots.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(EngineStatus {
            timestamp: Utc::now(),
            active_bots: bots.len(),
            ticks: self.ticks.load(Ordering::Relaxed),
            bots,
        })
    }

    async fn ensure_account(&self, owner: Uuid) -> Result<Account> {
        let _guard = self.user_locks.acquire(&owner).await;
        if let Some(account) = self.ctx.store.get_account(owner).await? {
            return Ok(account);
        }
        let account = Account::new(owner, self.ctx.settings.paper.starting_balance);
        self.ctx.store.save_account(&account).await?;
        info!("Created paper account for {} with {}", owner, account.cash);
        Ok(account)
    }

    async fn latest_price(&self, symbol: &str) -> Result<Decimal> {
        let timeout = self.ctx.settings.market_data_timeout();
        match tokio::time::timeout(timeout, self.ctx.market.get_latest_price(symbol)).await {
            Ok(result) => result.map_err(|e| EngineError::market_data(symbol, e)),
            Err(_) => Err(EngineError::market_data(
                symbol,
                MarketDataError::Transient(format!("price request timed out after {:?}", timeout)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Candle, Interval};
    use crate::store::InMemoryStore;
    use crate::types::BotStats;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl MarketDataProvider for Offline {
        async fn get_candles(&self, _symbol: &str, _interval: Interval, _limit: usize) -> std::result::Result<Vec<Candle>, MarketDataError> {
            Err(MarketDataError::Transient("offline".to_string()))
        }

        async fn get_latest_price(&self, _symbol: &str) -> std::result::Result<Decimal, MarketDataError> {
            Err(MarketDataError::Transient("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_tick_drops_idle_bot_locks() {
        let bot = Bot {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            name: "idle".to_string(),
            strategy: "trend_following".to_string(),
            symbols: vec!["BTC/USDT".to_string()],
            config: serde_json::Value::Null,
            paper_trading: true,
            risk_percent: Decimal::from(2),
            status: BotStatus::Idle,
            stats: BotStats::default(),
            last_error: None,
        };
        let id = bot.id;
        let store = Arc::new(InMemoryStore::with_bots(vec![bot]).await);
        let ctx = AppContext::new(EngineSettings::default(), store, Arc::new(Offline));
        let engine = Arc::new(BotEngine::new(Arc::new(ctx)));

        engine.activate_bot(id).await.unwrap();
        engine.tick_bot(id).await.unwrap_err();
        assert_eq!(engine.bot_locks.len(), 1);

        engine.pause_bot(id).await.unwrap();
        let summary = engine.tick().await;
        assert_eq!(summary.processed, 0);
        assert_eq!(engine.bot_locks.len(), 0);
        assert_eq!(engine.user_locks.len(), 0);
    }
}

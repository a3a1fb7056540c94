//! Persistence seam
//!
//! Bots, trades and accounts live behind `Store`. Multi-record changes go
//! through `Store::apply`, which commits a `StoreTx` entirely or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::portfolio::Account;
use crate::types::{Bot, Trade};

/// A set of writes committed atomically
#[derive(Debug, Clone, Default)]
pub struct StoreTx {
    pub trades: Vec<Trade>,
    pub account: Option<Account>,
    pub bot: Option<Bot>,
    /// Abort with `EngineError::Conflict` unless this trade is still open
    pub expect_open: Option<Uuid>,
}

impl StoreTx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trade(mut self, trade: Trade) -> Self {
        self.trades.push(trade);
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }

    pub fn bot(mut self, bot: Bot) -> Self {
        self.bot = Some(bot);
        self
    }

    pub fn expect_open(mut self, trade_id: Uuid) -> Self {
        self.expect_open = Some(trade_id);
        self
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_bot(&self, id: Uuid) -> Result<Option<Bot>>;
    async fn list_bots(&self) -> Result<Vec<Bot>>;
    async fn save_bot(&self, bot: &Bot) -> Result<()>;

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>>;
    /// Open trades of a bot, optionally for one symbol, oldest first
    async fn open_trades(&self, bot_id: Uuid, symbol: Option<&str>) -> Result<Vec<Trade>>;
    async fn closed_trades(&self, bot_id: Uuid) -> Result<Vec<Trade>>;

    async fn get_account(&self, owner: Uuid) -> Result<Option<Account>>;
    async fn save_account(&self, account: &Account) -> Result<()>;

    /// Commit every write in `tx`, or none of them
    async fn apply(&self, tx: StoreTx) -> Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    bots: HashMap<Uuid, Bot>,
    trades: HashMap<Uuid, Trade>,
    accounts: HashMap<Uuid, Account>,
}

/// Process-local store. A single write lock makes `apply` atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with bot definitions (e.g. from a bots file)
    pub async fn with_bots(bots: Vec<Bot>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write().await;
            for bot in bots {
                tables.bots.insert(bot.id, bot);
            }
        }
        store
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_bot(&self, id: Uuid) -> Result<Option<Bot>> {
        Ok(self.tables.read().await.bots.get(&id).cloned())
    }

    async fn list_bots(&self) -> Result<Vec<Bot>> {
        let tables = self.tables.read().await;
        let mut bots: Vec<Bot> = tables.bots.values().cloned().collect();
        bots.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(bots)
    }

    async fn save_bot(&self, bot: &Bot) -> Result<()> {
        self.tables.write().await.bots.insert(bot.id, bot.clone());
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        Ok(self.tables.read().await.trades.get(&id).cloned())
    }

    async fn open_trades(&self, bot_id: Uuid, symbol: Option<&str>) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        let mut trades: Vec<Trade> = tables
            .trades
            .values()
            .filter(|t| t.bot_id == bot_id && t.is_open())
            .filter(|t| symbol.map_or(true, |s| t.symbol == s))
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.opened_at);
        Ok(trades)
    }

    async fn closed_trades(&self, bot_id: Uuid) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        let mut trades: Vec<Trade> = tables
            .trades
            .values()
            .filter(|t| t.bot_id == bot_id && !t.is_open())
            .cloned()
            .collect();
        trades.sort_by_key(|t| t.closed_at);
        Ok(trades)
    }

    async fn get_account(&self, owner: Uuid) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&owner).cloned())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        self.tables
            .write()
            .await
            .accounts
            .insert(account.owner, account.clone());
        Ok(())
    }

    async fn apply(&self, tx: StoreTx) -> Result<()> {
        let mut tables = self.tables.write().await;

        // Validate everything before the first write
        if let Some(id) = tx.expect_open {
            match tables.trades.get(&id) {
                Some(trade) if trade.is_open() => {}
                Some(_) => return Err(EngineError::Conflict(id)),
                None => return Err(EngineError::TradeNotFound(id)),
            }
        }
        if let Some(bot) = &tx.bot {
            if !tables.bots.contains_key(&bot.id) {
                return Err(EngineError::BotNotFound(bot.id));
            }
        }

        for trade in tx.trades {
            tables.trades.insert(trade.id, trade);
        }
        if let Some(account) = tx.account {
            tables.accounts.insert(account.owner, account);
        }
        if let Some(bot) = tx.bot {
            tables.bots.insert(bot.id, bot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::open_trade;
    use crate::types::{Side, TradeStatus};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_apply_commits_all_records() {
        let store = InMemoryStore::new();
        let trade = open_trade(Side::Buy, Decimal::from(100));
        let account = Account::new(trade.owner, Decimal::from(1000));

        store
            .apply(StoreTx::new().trade(trade.clone()).account(account.clone()))
            .await
            .unwrap();

        assert_eq!(store.get_trade(trade.id).await.unwrap(), Some(trade.clone()));
        assert_eq!(store.get_account(trade.owner).await.unwrap(), Some(account));
        assert_eq!(store.open_trades(trade.bot_id, Some("BTC/USDT")).await.unwrap().len(), 1);
        assert!(store.open_trades(trade.bot_id, Some("ETH/USDT")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expect_open_guards_double_close() {
        let store = InMemoryStore::new();
        let mut trade = open_trade(Side::Buy, Decimal::from(100));
        store.apply(StoreTx::new().trade(trade.clone())).await.unwrap();

        trade.status = TradeStatus::Closed;
        store
            .apply(StoreTx::new().trade(trade.clone()).expect_open(trade.id))
            .await
            .unwrap();

        // Second close of the same trade: nothing is written
        let account = Account::new(trade.owner, Decimal::from(1000));
        let err = store
            .apply(StoreTx::new().trade(trade.clone()).account(account).expect_open(trade.id))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(id) if id == trade.id));
        assert!(store.get_account(trade.owner).await.unwrap().is_none());
        assert_eq!(store.closed_trades(trade.bot_id).await.unwrap().len(), 1);
    }
}

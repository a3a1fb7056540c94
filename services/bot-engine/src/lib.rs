//! Bot Engine Library
//!
//! Decision and execution core for automated crypto trading bots:
//! strategies produce signals, the risk manager gates entries, the SL/TP
//! manager drives each open trade through its phases and the engine ties
//! them to market data, brokers and persistence.

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod locks;
pub mod market;
pub mod portfolio;
pub mod risk;
pub mod runner;
pub mod scheduler;
pub mod sltp;
pub mod state;
pub mod store;
pub mod strategy;
pub mod symbols;
pub mod types;


// Re-export main types for convenience
pub use broker::{Broker, OrderRequest, OrderResult, OrderStatus, PaperBroker};
pub use config::{BotSettings, EngineSettings, SchedulerMode};
pub use engine::{AppContext, BotEngine, EngineStatus, TickOutcome, TickSummary};
pub use error::{BrokerError, ConfigError, EngineError, MarketDataError, Result};
pub use indicators::{IndicatorLibrary, StandardIndicators};
pub use market::{Candle, HttpMarketData, Interval, MarketDataProvider, MarketSnapshot};
pub use portfolio::Account;
pub use risk::{RiskLimits, RiskManager, TradeContext, TradeSource, ValidationResult};
pub use runner::EngineRunner;
pub use scheduler::{BotReport, Supervisor};
pub use sltp::{RiskProfile, SltpManager, SltpSettings, TradeState, TradeUpdate};
pub use state::StateManager;
pub use store::{InMemoryStore, Store, StoreTx};
pub use strategy::{Strategy, StrategyRegistry};
pub use types::{Bot, BotStats, BotStatus, CloseReason, Side, SignalDirection, Trade, TradePhase, TradeStatus};

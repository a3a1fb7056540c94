//! Error types for the bot engine

use uuid::Uuid;

/// Configuration problems. Always fatal for the bot (or process) being configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid value for {field}: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn out_of_range(
        field: &'static str,
        value: impl std::fmt::Display,
        expected: &'static str,
    ) -> Self {
        ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Market data collaborator failures
#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    /// Network hiccup, timeout, 5xx. Retried on the next scheduled tick.
    #[error("Transient market data failure: {0}")]
    Transient(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl MarketDataError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketDataError::Transient(_))
    }
}

/// Broker collaborator failures
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Top-level engine error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Market data error for {symbol}: {source}")]
    MarketData {
        symbol: String,
        #[source]
        source: MarketDataError,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Bot not found: {0}")]
    BotNotFound(Uuid),

    #[error("Trade not found: {0}")]
    TradeNotFound(Uuid),

    #[error("Trade {0} is no longer open")]
    Conflict(Uuid),
}

impl EngineError {
    pub fn market_data(symbol: &str, source: MarketDataError) -> Self {
        EngineError::MarketData {
            symbol: symbol.to_string(),
            source,
        }
    }

    /// Transient errors skip the current tick only; everything else puts the bot in ERROR.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::MarketData { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

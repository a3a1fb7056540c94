//! Engine and bot configuration
//!
//! `EngineSettings` is process-wide and comes from an optional settings file
//! overlaid with `BOT_ENGINE__*` environment variables. `BotSettings` is
//! parsed from each bot's raw `config` blob at activation.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::market::{IndicatorSettings, Interval};
use crate::risk::{RiskLimits, MAX_POSITION_CEILING_PCT};
use crate::sltp::{RiskProfile, SltpOverrides, SltpSettings};
use crate::symbols::parse_symbol;
use crate::types::Bot;

/// Env var naming the settings file
pub const CONFIG_PATH_ENV: &str = "BOT_ENGINE_CONFIG";
/// Prefix of settings env vars, e.g. `BOT_ENGINE__TICK_INTERVAL_SECS`
pub const ENV_PREFIX: &str = "BOT_ENGINE";

/// How bot ticks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// One timer ticks every active bot
    #[default]
    Shared,
    /// One task and timer per bot
    PerBot,
}

/// Process-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub scheduler: SchedulerMode,
    /// Reconcile bot stats every N shared ticks (0 disables)
    #[serde(default = "default_reconcile_every_ticks")]
    pub reconcile_every_ticks: u64,
    #[serde(default)]
    pub candle_interval: Interval,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default)]
    pub market_data: MarketDataSettings,
    #[serde(default)]
    pub paper: PaperSettings,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub indicators: IndicatorSettings,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// JSON file with bot definitions loaded at startup
    #[serde(default)]
    pub bots_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketDataSettings {
    #[serde(default = "default_market_data_url")]
    pub url: String,
    /// Applies to every market data request
    #[serde(default = "default_market_data_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        Self {
            url: default_market_data_url(),
            timeout_secs: default_market_data_timeout_secs(),
        }
    }
}

/// Paper trading simulation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperSettings {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    #[serde(default = "default_commission_bps")]
    pub commission_bps: u32,
    #[serde(default)]
    pub max_slippage_bps: u32,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            commission_bps: default_commission_bps(),
            max_slippage_bps: 0,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            scheduler: SchedulerMode::default(),
            reconcile_every_ticks: default_reconcile_every_ticks(),
            candle_interval: Interval::default(),
            candle_limit: default_candle_limit(),
            status_interval_secs: default_status_interval_secs(),
            market_data: MarketDataSettings::default(),
            paper: PaperSettings::default(),
            risk: RiskLimits::default(),
            indicators: IndicatorSettings::default(),
            state_dir: default_state_dir(),
            bots_file: None,
            log_level: default_log_level(),
        }
    }
}

fn default_tick_interval_secs() -> u64 { 60 }
fn default_reconcile_every_ticks() -> u64 { 60 }
fn default_candle_limit() -> usize { 100 }
fn default_status_interval_secs() -> u64 { 30 }
fn default_state_dir() -> PathBuf { PathBuf::from("state") }
fn default_log_level() -> String { "info".to_string() }
fn default_market_data_url() -> String { "http://localhost:8080".to_string() }
fn default_market_data_timeout_secs() -> u64 { 10 }
fn default_starting_balance() -> Decimal { Decimal::from(10_000) }
fn default_commission_bps() -> u32 { 10 }

impl EngineSettings {
    /// Load from `$BOT_ENGINE_CONFIG` (default `bot-engine.toml`, optional) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "bot-engine.toml".to_string());
        let required = std::env::var(CONFIG_PATH_ENV).is_ok();
        Self::load_from(&path, required)
    }

    pub fn load_from(path: &str, required: bool) -> Result<Self, ConfigError> {
        debug!("Loading settings from {} (required: {})", path, required);

        let settings: EngineSettings = config::Config::builder()
            .add_source(config::File::with_name(path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::out_of_range("tick_interval_secs", 0, "> 0"));
        }
        if self.candle_limit < 2 {
            return Err(ConfigError::out_of_range("candle_limit", self.candle_limit, ">= 2"));
        }
        if self.market_data.timeout_secs == 0 {
            return Err(ConfigError::out_of_range("market_data.timeout_secs", 0, "> 0"));
        }
        if self.paper.starting_balance <= Decimal::ZERO {
            return Err(ConfigError::out_of_range(
                "paper.starting_balance",
                self.paper.starting_balance,
                "> 0",
            ));
        }
        if self.risk.max_trade_size <= Decimal::ZERO {
            return Err(ConfigError::out_of_range("risk.max_trade_size", self.risk.max_trade_size, "> 0"));
        }
        if self.risk.max_stop_distance_pct <= Decimal::ZERO || self.risk.max_stop_distance_pct >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::out_of_range(
                "risk.max_stop_distance_pct",
                self.risk.max_stop_distance_pct,
                "0 < pct < 100",
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn market_data_timeout(&self) -> Duration {
        Duration::from_secs(self.market_data.timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

/// Per-bot settings parsed from `Bot::config`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfigBlob {
    pub strategy_params: serde_json::Value,
    pub risk_profile: RiskProfile,
    pub sltp: SltpOverrides,
    pub max_position_pct: Option<Decimal>,
    pub allow_short: bool,
    /// Use the strategy's own SL/TP instead of the SL/TP manager's
    pub use_strategy_levels: bool,
}

/// Validated per-bot settings
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub strategy_params: serde_json::Value,
    pub risk_profile: RiskProfile,
    pub sltp: SltpSettings,
    pub risk_percent: Decimal,
    pub allow_short: bool,
    pub use_strategy_levels: bool,
}

impl BotSettings {
    pub fn from_bot(bot: &Bot) -> Result<Self, ConfigError> {
        let blob: BotConfigBlob = if bot.config.is_null() {
            BotConfigBlob::default()
        } else {
            serde_json::from_value(bot.config.clone())
                .map_err(|e| ConfigError::Invalid(format!("bot config: {}", e)))?
        };

        if bot.risk_percent <= Decimal::ZERO || bot.risk_percent > Decimal::ONE_HUNDRED {
            return Err(ConfigError::out_of_range("risk_percent", bot.risk_percent, "0 < pct <= 100"));
        }
        if bot.symbols.is_empty() {
            return Err(ConfigError::Invalid("bot has no symbols".to_string()));
        }
        if let Some(symbol) = bot.symbols.iter().find(|s| parse_symbol(s).is_none()) {
            return Err(ConfigError::Invalid(format!("unrecognised symbol {}", symbol)));
        }

        let mut sltp = blob.sltp.apply(SltpSettings::for_profile(blob.risk_profile));
        sltp.max_position_pct = blob.max_position_pct.unwrap_or(MAX_POSITION_CEILING_PCT);
        sltp.validate()?;

        Ok(Self {
            strategy_params: blob.strategy_params,
            risk_profile: blob.risk_profile,
            sltp,
            risk_percent: bot.risk_percent,
            allow_short: blob.allow_short,
            use_strategy_levels: blob.use_strategy_levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sltp::StopLossMethod;
    use std::io::Write;
    use uuid::Uuid;

    fn bot(config: serde_json::Value) -> Bot {
        Bot {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            name: "test".to_string(),
            strategy: "trend_following".to_string(),
            symbols: vec!["BTC/USDT".to_string()],
            config,
            paper_trading: true,
            risk_percent: Decimal::TWO,
            status: Default::default(),
            stats: Default::default(),
            last_error: None,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tick_interval(), Duration::from_secs(60));
        assert_eq!(settings.paper.starting_balance, Decimal::from(10_000));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
tick_interval_secs = 15
scheduler = "per_bot"
candle_interval = "15m"

[paper]
starting_balance = "2500"

[risk]
max_trade_size = "400"
symbol_blacklist = ["DOGE"]
"#
        )
        .unwrap();

        let settings = EngineSettings::load_from(file.path().to_str().unwrap(), true).unwrap();
        assert_eq!(settings.tick_interval_secs, 15);
        assert_eq!(settings.scheduler, SchedulerMode::PerBot);
        assert_eq!(settings.candle_interval, Interval::Minute15);
        assert_eq!(settings.paper.starting_balance, Decimal::from(2500));
        assert_eq!(settings.risk.max_trade_size, Decimal::from(400));
        assert_eq!(settings.risk.symbol_blacklist, vec!["DOGE".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(settings.risk.max_daily_trades, 20);
        assert_eq!(settings.market_data.timeout_secs, 10);
    }

    #[test]
    fn test_missing_required_file_fails() {
        assert!(EngineSettings::load_from("/nonexistent/bot-engine.toml", true).is_err());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = EngineSettings {
            tick_interval_secs: 0,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bot_settings_from_blob() {
        let settings = BotSettings::from_bot(&bot(serde_json::json!({
            "risk_profile": "aggressive",
            "sltp": { "sl_method": "percent", "tp1_exit_pct": "40" },
            "max_position_pct": "10",
            "allow_short": true,
            "strategy_params": { "fast_period": 5, "slow_period": 20 }
        })))
        .unwrap();

        assert_eq!(settings.risk_profile, RiskProfile::Aggressive);
        assert_eq!(settings.sltp.sl_method, StopLossMethod::Percent);
        assert_eq!(settings.sltp.tp1_exit_pct, Decimal::from(40));
        assert_eq!(settings.sltp.tp2_risk_reward, Decimal::from(4));
        assert_eq!(settings.sltp.max_position_pct, Decimal::from(10));
        assert!(settings.allow_short);
        assert_eq!(settings.strategy_params["fast_period"], 5);
    }

    #[test]
    fn test_bot_settings_defaults_for_null_config() {
        let settings = BotSettings::from_bot(&bot(serde_json::Value::Null)).unwrap();
        assert_eq!(settings.risk_profile, RiskProfile::Moderate);
        assert_eq!(settings.sltp.max_position_pct, MAX_POSITION_CEILING_PCT);
        assert!(!settings.allow_short);
    }

    #[test]
    fn test_bot_settings_rejects_bad_values() {
        let err = BotSettings::from_bot(&bot(serde_json::json!({ "max_position_pct": "60" }))).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "max_position_pct", .. }));

        let err = BotSettings::from_bot(&bot(serde_json::json!({ "risk_profile": "yolo" }))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut no_symbols = bot(serde_json::Value::Null);
        no_symbols.symbols.clear();
        assert!(BotSettings::from_bot(&no_symbols).is_err());
    }
}

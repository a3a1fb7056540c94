//! Bot Engine - runs trading bots against a market data service
//!
//! Startup:
//! 1. Loads settings (file + `BOT_ENGINE__*` env, `.env` via dotenvy)
//! 2. Seeds the store from the bots file
//! 3. Activates every bot marked RUNNING
//! 4. Ticks bots on a shared timer or one task per bot until Ctrl-C

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use bot_engine::{
    AppContext, Bot, BotEngine, BotStatus, EngineRunner, EngineSettings, HttpMarketData, InMemoryStore,
    SchedulerMode, StateManager, Supervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env is normal outside development
        eprintln!("No .env loaded: {}", e);
    }

    let settings = EngineSettings::load().context("loading settings")?;

    tracing_subscriber::fmt()
        .with_max_level(parse_level(&settings.log_level))
        .init();

    info!("Starting Bot Engine...");
    info!(
        "Market data: {} | scheduler: {:?} | tick: {}s",
        settings.market_data.url, settings.scheduler, settings.tick_interval_secs
    );

    let bots = match &settings.bots_file {
        Some(path) => load_bots(path).await?,
        None => {
            warn!("No bots_file configured, starting with no bots");
            Vec::new()
        }
    };
    let to_activate: Vec<_> = bots
        .iter()
        .filter(|b| b.status == BotStatus::Running)
        .map(|b| b.id)
        .collect();

    let store = Arc::new(InMemoryStore::with_bots(bots).await);
    let market = Arc::new(HttpMarketData::new(
        &settings.market_data.url,
        settings.market_data_timeout(),
    )?);
    let state = StateManager::new(settings.state_dir.clone());
    let scheduler = settings.scheduler;
    let tick_interval = settings.tick_interval();

    let ctx = Arc::new(AppContext::new(settings, store, market));
    let engine = Arc::new(BotEngine::new(ctx));

    for bot_id in to_activate {
        // Failures leave the bot in ERROR; the rest still start
        if let Err(e) = engine.activate_bot(bot_id).await {
            error!(bot_id = %bot_id, "Activation failed: {}", e);
        }
    }
    info!("{} bots active", engine.active_bot_ids().await.len());

    match scheduler {
        SchedulerMode::Shared => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let runner = EngineRunner::new(Arc::clone(&engine), state);
            let handle = tokio::spawn(runner.run(shutdown_rx));

            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested, finishing in-flight tick...");
            shutdown_tx.send(true)?;
            handle.await??;
        }
        SchedulerMode::PerBot => {
            run_supervised(engine, state, tick_interval).await?;
        }
    }

    info!("Bot Engine stopped");
    Ok(())
}

/// Per-bot scheduling: one task per bot, status on its own timer
async fn run_supervised(
    engine: Arc<BotEngine>,
    state: StateManager,
    period: std::time::Duration,
) -> anyhow::Result<()> {
    state.init().await?;
    let status_period = engine.context().settings.status_interval();

    let (mut supervisor, mut reports) = Supervisor::new(Arc::clone(&engine), period);
    supervisor.sync().await;

    let mut status_interval = tokio::time::interval(status_period);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(report) = reports.recv() => {
                info!(bot_id = %report.bot_id, "Tick outcome: {:?}", report.outcome);
            }
            _ = status_interval.tick() => {
                supervisor.sync().await;
                match engine.status().await {
                    Ok(status) => {
                        if let Err(e) = state.write_status(&status).await {
                            error!("Status write error: {}", e);
                        }
                    }
                    Err(e) => error!("Status collection error: {}", e),
                }
            }
            result = &mut ctrl_c => {
                result?;
                info!("Shutdown requested, stopping bot tasks...");
                break;
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

async fn load_bots(path: &Path) -> anyhow::Result<Vec<Bot>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading bots file {}", path.display()))?;
    let bots: Vec<Bot> =
        serde_json::from_str(&raw).with_context(|| format!("parsing bots file {}", path.display()))?;
    info!("Loaded {} bots from {}", bots.len(), path.display());
    Ok(bots)
}

fn parse_level(level: &str) -> tracing::Level {
    level.parse().unwrap_or(tracing::Level::INFO)
}

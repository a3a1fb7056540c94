//! Engine Runner - Shared-timer orchestration loop

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::engine::BotEngine;
use crate::state::StateManager;

/// Drives `BotEngine::tick` on one timer for every active bot
pub struct EngineRunner {
    engine: Arc<BotEngine>,
    state: StateManager,
    ticks: u64,
}

impl EngineRunner {
    pub fn new(engine: Arc<BotEngine>, state: StateManager) -> Self {
        Self {
            engine,
            state,
            ticks: 0,
        }
    }

    /// Run until `shutdown` flips to true. An in-flight tick always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let settings = self.engine.context().settings.clone();
        info!(
            "Engine runner starting: tick every {}s, status every {}s",
            settings.tick_interval_secs, settings.status_interval_secs
        );

        self.state.init().await?;

        let mut tick_interval = interval(settings.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status_interval = interval(settings.status_interval());
        status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.run_tick(settings.reconcile_every_ticks).await;
                }
                _ = status_interval.tick() => {
                    self.write_status().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.write_status().await;
        info!("Engine runner stopped after {} ticks", self.ticks);
        Ok(())
    }

    async fn run_tick(&mut self, reconcile_every: u64) {
        let summary = self.engine.tick().await;
        self.ticks += 1;

        info!(
            "Tick {}: {} ok, {} skipped, {} failed",
            self.ticks,
            summary.processed,
            summary.skipped.len(),
            summary.failed.len()
        );
        for (bot_id, reason) in &summary.failed {
            warn!(bot_id = %bot_id, "Bot moved to ERROR: {}", reason);
        }

        if reconcile_every > 0 && self.ticks % reconcile_every == 0 {
            let healed = self.engine.reconcile_all().await;
            if healed > 0 {
                warn!("Reconciliation healed stats for {} bots", healed);
            }
        }
    }

    async fn write_status(&self) {
        match self.engine.status().await {
            Ok(status) => {
                if let Err(e) = self.state.write_status(&status).await {
                    error!("Status write error: {}", e);
                }
            }
            Err(e) => error!("Status collection error: {}", e),
        }
    }
}

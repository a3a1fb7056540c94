//! Per-bot scheduling
//!
//! `Supervisor` runs one task per active bot, each on its own timer. Every
//! task owns a `watch` cancellation receiver and reports tick outcomes back
//! over an `mpsc` channel. Stopping is cooperative: an in-flight tick
//! completes and no further ticks are issued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{BotEngine, TickOutcome};

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one bot tick, sent to the supervisor
#[derive(Debug, Clone)]
pub struct BotReport {
    pub bot_id: Uuid,
    pub outcome: TickOutcome,
    pub at: DateTime<Utc>,
}

struct BotTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    engine: Arc<BotEngine>,
    period: Duration,
    tasks: HashMap<Uuid, BotTask>,
    reports: mpsc::Sender<BotReport>,
}

impl Supervisor {
    /// Supervisor plus the receiving end of its report channel
    pub fn new(engine: Arc<BotEngine>, period: Duration) -> (Self, mpsc::Receiver<BotReport>) {
        let (reports, rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let supervisor = Self {
            engine,
            period,
            tasks: HashMap::new(),
            reports,
        };
        (supervisor, rx)
    }

    pub fn supervised(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.tasks.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Start a task for `bot_id` unless one is already running
    pub fn start(&mut self, bot_id: Uuid) {
        if self.tasks.get(&bot_id).is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(bot_loop(
            Arc::clone(&self.engine),
            bot_id,
            self.period,
            cancelled,
            self.reports.clone(),
        ));
        self.tasks.insert(bot_id, BotTask { cancel, handle });
        info!(bot_id = %bot_id, "Started bot task ({:?} period)", self.period);
    }

    /// Signal the bot's task to stop and wait for it
    pub async fn stop(&mut self, bot_id: Uuid) {
        let Some(task) = self.tasks.remove(&bot_id) else {
            return;
        };
        // Err only means the task already exited
        let _ = task.cancel.send(true);
        if let Err(e) = task.handle.await {
            warn!(bot_id = %bot_id, "Bot task ended abnormally: {}", e);
        }
        info!(bot_id = %bot_id, "Stopped bot task");
    }

    /// Match tasks to the engine's active set: start missing tasks, drop
    /// tasks that have exited or whose bot is no longer active
    pub async fn sync(&mut self) {
        let active = self.engine.active_bot_ids().await;

        let stale: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|(id, task)| task.handle.is_finished() || !active.contains(id))
            .map(|(id, _)| *id)
            .collect();
        for bot_id in stale {
            self.stop(bot_id).await;
        }

        for bot_id in active {
            self.start(bot_id);
        }
    }

    pub async fn shutdown(&mut self) {
        for bot_id in self.supervised() {
            self.stop(bot_id).await;
        }
    }
}

async fn bot_loop(
    engine: Arc<BotEngine>,
    bot_id: Uuid,
    period: Duration,
    mut cancelled: watch::Receiver<bool>,
    reports: mpsc::Sender<BotReport>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !engine.is_active(bot_id).await {
                    debug!(bot_id = %bot_id, "Bot no longer active, task exiting");
                    break;
                }

                let outcome = engine.run_isolated(bot_id).await;
                let failed = matches!(outcome, TickOutcome::Failed(_));
                let report = BotReport { bot_id, outcome, at: Utc::now() };
                if reports.send(report).await.is_err() {
                    debug!(bot_id = %bot_id, "Report channel closed");
                }
                if failed {
                    break;
                }
            }
            changed = cancelled.changed() => {
                if changed.is_err() || *cancelled.borrow() {
                    break;
                }
            }
        }
    }
}

//! Background timers: periodic store saves and media retention sweeps.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_storage::{ChatMemoryStore, PersistenceError};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::janitor::run_sweep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub save_interval: Duration,
    pub janitor_interval: Duration,
    pub media_dir: PathBuf,
    pub files_max_age: Duration,
}

impl MaintenanceConfig {
    pub fn from_bot_config(config: &BotConfig, media_dir: PathBuf) -> Self {
        Self {
            save_interval: Duration::from_secs(config.save_interval_secs.max(1)),
            janitor_interval: Duration::from_secs(config.janitor_interval_secs.max(1)),
            media_dir,
            files_max_age: config.media.files_max_age(),
        }
    }
}

/// Running maintenance tasks. Call [`shutdown`](Self::shutdown) to stop them
/// and write a final snapshot.
#[derive(Debug)]
pub struct MaintenanceHandle {
    store: Arc<ChatMemoryStore>,
    cancel: CancellationToken,
    save_task: JoinHandle<()>,
    janitor_task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both timers, wait for them, then save once more.
    pub async fn shutdown(self) -> Result<(), PersistenceError> {
        self.cancel.cancel();
        for (name, task) in [("save", self.save_task), ("janitor", self.janitor_task)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Maintenance task ended abnormally");
            }
        }

        self.store.save().await?;
        info!(chats = self.store.len(), "Final memory snapshot saved");
        Ok(())
    }
}

/// Start the save timer and the janitor timer.
///
/// Neither timer fires immediately; the first tick is one interval away.
pub fn spawn_maintenance(store: Arc<ChatMemoryStore>, config: MaintenanceConfig) -> MaintenanceHandle {
    let cancel = CancellationToken::new();

    let save_task = tokio::spawn(save_loop(
        store.clone(),
        config.save_interval,
        cancel.child_token(),
    ));
    let janitor_task = tokio::spawn(janitor_loop(
        config.media_dir,
        config.files_max_age,
        config.janitor_interval,
        cancel.child_token(),
    ));

    MaintenanceHandle {
        store,
        cancel,
        save_task,
        janitor_task,
    }
}

async fn save_loop(store: Arc<ChatMemoryStore>, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // A failed save keeps the previous snapshot; the next tick retries.
                if let Err(e) = store.save().await {
                    error!(error = %e, "Periodic memory save failed");
                }
            }
        }
    }
    debug!("Save timer stopped");
}

async fn janitor_loop(dir: PathBuf, max_age: Duration, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_sweep(dir.clone(), max_age).await {
                    warn!(dir = %dir.display(), error = %e, "Media retention sweep failed");
                }
            }
        }
    }
    debug!("Janitor timer stopped");
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::journal::{BackupEvent, BackupEventKind};
use crate::manager::{BackupKind, BackupManager};

/// Runs one `scheduled` backup per day at a fixed local time.
///
/// Dropping the scheduler aborts its task.
pub struct BackupScheduler {
    at: NaiveTime,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// The first occurrence of `at` strictly after `now`.
pub fn next_run(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

fn delay_until_next(at: NaiveTime) -> Duration {
    let now = Local::now().naive_local();
    let next = next_run(now, at);
    debug!("next scheduled backup at {next}");
    (next - now).to_std().unwrap_or_default()
}

impl BackupScheduler {
    /// Spawn the scheduler on the current tokio runtime.
    pub fn start(manager: Arc<BackupManager>, at: NaiveTime) -> Self {
        Self::spawn(manager, at, move || delay_until_next(at))
    }

    fn spawn<F>(manager: Arc<BackupManager>, at: NaiveTime, next_delay: F) -> Self
    where
        F: Fn() -> Duration + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("backup scheduler started (daily at {})", at.format("%H:%M"));
            manager.log(
                BackupEvent::new(BackupEventKind::SchedulerStart)
                    .details(serde_json::json!({ "at": at.format("%H:%M").to_string() })),
            );
            loop {
                let fire = tokio::select! {
                    _ = tokio::time::sleep(next_delay()) => true,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("backup scheduler shutting down");
                            break;
                        }
                        false
                    }
                };
                if !fire {
                    continue;
                }

                if !manager.db_path().exists() {
                    warn!(
                        "scheduled backup skipped: {} does not exist",
                        manager.db_path().display()
                    );
                    manager.log(
                        BackupEvent::new(BackupEventKind::Skipped)
                            .kind(BackupKind::Scheduled)
                            .details(serde_json::json!({ "reason": "database file not found" })),
                    );
                    continue;
                }

                let worker = Arc::clone(&manager);
                let result = tokio::task::spawn_blocking(move || {
                    worker.create_backup(BackupKind::Scheduled, None)
                })
                .await;
                match result {
                    Ok(Ok(path)) => info!("scheduled backup written to {}", path.display()),
                    Ok(Err(e)) => error!("scheduled backup failed: {e}"),
                    Err(e) => error!("scheduled backup task panicked: {e}"),
                }
            }
            manager.log(BackupEvent::new(BackupEventKind::SchedulerStop));
        });

        Self {
            at,
            handle: Some(handle),
            shutdown_tx,
        }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the task to exit after any backup in progress.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

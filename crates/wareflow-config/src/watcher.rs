use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::loader::{load_file, validate};
use crate::model::AppConfig;

/// Quiet period after the last file event before the config is re-read.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Re-reads the config file when it changes and publishes valid results on a
/// `tokio::sync::watch` channel.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `config_path`. The receiver starts at `initial_config`
    /// and sees each config that differs from the last one published.
    /// Invalid edits are logged and skipped.
    pub fn start(
        config_path: PathBuf,
        initial_config: AppConfig,
    ) -> Result<(Self, watch::Receiver<AppConfig>), notify::Error> {
        let (config_tx, config_rx) = watch::channel(initial_config);
        let (event_tx, event_rx) = mpsc::channel::<()>(8);

        let file_name = config_path.file_name().unwrap_or_default().to_os_string();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if is_config_event(&event, &file_name) {
                    let _ = event_tx.try_send(());
                }
            }
        })?;

        // Editors save via temp file + rename, so watch the directory.
        let dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tokio::spawn(reload_loop(config_path.clone(), event_rx, config_tx));

        info!("watching config file: {}", config_path.display());
        Ok((
            Self {
                path: config_path,
                _watcher: watcher,
            },
            config_rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_config_event(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name))
}

async fn reload_loop(
    path: PathBuf,
    mut events: mpsc::Receiver<()>,
    config_tx: watch::Sender<AppConfig>,
) {
    while events.recv().await.is_some() {
        tokio::time::sleep(DEBOUNCE).await;
        while events.try_recv().is_ok() {}

        let config = match reload_config(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("config reload failed, keeping previous config: {e}");
                continue;
            }
        };
        if *config_tx.borrow() == config {
            debug!("config file touched without changes");
            continue;
        }
        info!("config reloaded from {}", path.display());
        if config_tx.send(config).is_err() {
            break;
        }
    }
}

fn reload_config(path: &Path) -> wareflow_common::Result<AppConfig> {
    let config = load_file(path)?;
    validate(&config)?;
    Ok(config)
}

pub mod loader;
pub mod model;
pub mod watcher;

pub use loader::ConfigLoader;
pub use model::{AppConfig, BackupConfig, DatabaseConfig, parse_backup_time};
pub use watcher::ConfigWatcher;

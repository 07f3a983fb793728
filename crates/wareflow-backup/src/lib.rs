pub mod journal;
pub mod manager;
pub mod scheduler;
pub mod service;

pub use journal::{BackupEvent, BackupEventKind, BackupJournal, BackupStatistics};
pub use manager::{BackupInfo, BackupKind, BackupManager, BackupStats, BackupVerification};
pub use scheduler::BackupScheduler;
pub use service::BackupService;

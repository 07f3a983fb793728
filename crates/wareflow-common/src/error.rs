use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// A migration's `pre_check` returned false. Nothing was changed by it.
    #[error("migration pre-check failed: {0}")]
    PreCheckFailed(String),

    #[error("migration failed: {name}: {reason}")]
    MigrationFailed { name: String, reason: String },

    /// A migration's `post_check` returned false or errored after `up()` ran
    /// and was recorded.
    #[error(
        "migration post-check failed: {name}: {reason} (applied and recorded, manual review required)"
    )]
    PostCheckFailed { name: String, reason: String },

    #[error("migration cannot be rolled back: {0}")]
    Irreversible(String),

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("trigger {id} not found")]
    NotFound { id: i64 },

    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("invalid trigger status: {0}")]
    InvalidStatus(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, TriggerError>;

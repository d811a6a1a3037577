use thiserror::Error;

/// Failures of the store engine. Absence of data is never an error here:
/// point updates and deletes on unknown ids report `Ok(false)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("corrupt row '{id}': {reason}")]
    CorruptRow { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

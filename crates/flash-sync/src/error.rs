use flash_db::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid remote url '{0}'")]
    InvalidUrl(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

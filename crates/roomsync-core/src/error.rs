use roomsync_models::AccountId;
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("no live worker for account {0}")]
    WorkerUnavailable(AccountId),
    #[error("timed out waiting for worker")]
    Timeout,
    #[error("account {0} is not authorized")]
    AuthorizationRequired(AccountId),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("internal error: {0}")]
    Internal(String),
}

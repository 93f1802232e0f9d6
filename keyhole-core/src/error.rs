use thiserror::Error;

use crate::client::ClientError;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("every configured dataset failed this cycle")]
    AllDatasetsFailed,
}

pub type Result<T> = std::result::Result<T, MonitorError>;

// Roomwatch Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected: {0}")]
    NotificationRejected(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Model inference error: {0}")]
    ModelInference(String),

    #[error("No model loaded")]
    ModelUnavailable,

    #[error("Classification cycle timed out after {0:?}")]
    CycleTimeout(std::time::Duration),

    #[error("Classification cycle panicked")]
    CyclePanicked,

    #[error("Engine stopped")]
    EngineStopped,

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for MonitorError {
    fn from(err: anyhow::Error) -> Self {
        MonitorError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

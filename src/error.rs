//! Error types for drudge-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid job payload: {0}")]
    Payload(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

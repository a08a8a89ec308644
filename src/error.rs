//! Crate-wide error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid device \"{id}\": {reason}")]
    InvalidDevice { id: String, reason: String },

    #[error("actuation failed for \"{id}\": {message}")]
    Actuation { id: String, message: String },

    #[error("event sink failed: {0}")]
    EventSink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

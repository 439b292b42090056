//! Error types for MailCatch

use thiserror::Error;

/// Main error type for MailCatch
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for MailCatch
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status the read API answers with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Config(_) | Error::Storage(_) | Error::Internal(_) => 500,
        }
    }
}

//! Mailbox error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("log error: {0}")]
    Log(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type MailboxResult<T> = Result<T, MailboxError>;

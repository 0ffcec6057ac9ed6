use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Transaction timed out: {0}")]
    TransactionTimedOut(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, MqError>;

impl<T> From<std::sync::PoisonError<T>> for MqError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MqError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

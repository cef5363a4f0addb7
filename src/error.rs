//! Top-level error types for shopbot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Database connection and operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("schema setup failed: {0}")]
    Schema(String),

    #[error("invalid task status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outbound channel delivery errors.
///
/// Delivery failure after a successful agent response is a recoverable
/// condition for the dispatcher: the task degrades to awaiting approval and
/// the generated reply is kept. It is never a process-level failure.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("push request failed: {0}")]
    Request(String),

    #[error("push rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

use thiserror::Error;

/// Errors shared across the harness.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid arrival spec {spec:?}: {reason}")]
    InvalidLoadSpec { spec: String, reason: String },

    #[error("{0}")]
    Config(String),

    #[error("line {line_no}: slowlog entry does not match the expected format")]
    MalformedLog { line_no: usize },

    #[error("line {line_no}: invalid loadspec entry: {reason}")]
    MalformedInput { line_no: usize, reason: String },

    #[error("expected {expected} gauge values, got {got}")]
    InvalidArgument { expected: usize, got: usize },

    #[error("server rejected the request ({kind}): {reason}")]
    ServerFatal { kind: String, reason: String },

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

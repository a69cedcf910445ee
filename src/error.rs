use serde::Serialize;

/// Crate-wide error taxonomy. Components never raise across their
/// boundary -- every public operation returns `AppResult<T>` rather than
/// panicking, so callers always get an explicit success/failure plus a short
/// diagnostic string.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("not authenticated: {0}")]
    Auth(String),

    #[error("unexpected server response: {0}")]
    Protocol(String),

    #[error("conflict: {0}")]
    ConflictRemote(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("local I/O error: {0}")]
    Local(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

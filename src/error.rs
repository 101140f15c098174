/// Errors returned by the tracker's repositories and workflow operations.
///
/// `Validation` and `Conflict` are the two kinds surfaced to the person who
/// submitted a form. A near-duplicate chassis assignment is not an error; see
/// [`crate::workflow::AssignOutcome::ConfirmationRequired`].
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// A uniqueness rule was violated. The stored data is left unchanged.
    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account is awaiting administrator approval")]
    PendingApproval,

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading an import file failed before any row was inspected.
    #[error("import failed: {0}")]
    Import(String),

    #[error("export failed: {0}")]
    Export(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

impl TrackerError {
    pub fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        TrackerError::Conflict(message.into())
    }
}

/// Map a constraint violation reported by SQLite to a `Conflict`.
///
/// Any other database error is passed through unchanged.
pub(crate) fn conflict_on_constraint(err: rusqlite::Error, message: &str) -> TrackerError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            TrackerError::Conflict(message.to_string())
        }
        _ => TrackerError::Database(err),
    }
}

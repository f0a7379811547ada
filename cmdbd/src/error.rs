use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T, E = CmdbError> = std::result::Result<T, E>;

/// Failure kinds surfaced by every store, reconcile and graph operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CmdbError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("storage failure: {message}")]
    Storage { message: String, retryable: bool },
}

impl CmdbError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CmdbError::InvalidArgument(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CmdbError::Conflict(message.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CmdbError::NotFound { entity, id }
    }

    pub fn storage(message: impl Into<String>, retryable: bool) -> Self {
        CmdbError::Storage {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CmdbError::Storage { retryable: true, .. })
    }
}

impl From<rusqlite::Error> for CmdbError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, ref message) = err {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    return match failure.extended_code {
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                            CmdbError::Conflict(detail)
                        }
                        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                            CmdbError::InvalidArgument(format!("unresolved reference: {detail}"))
                        }
                        _ => CmdbError::InvalidArgument(detail),
                    };
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return CmdbError::storage(detail, true);
                }
                _ => {}
            }
        }
        CmdbError::storage(err.to_string(), false)
    }
}

impl From<serde_json::Error> for CmdbError {
    fn from(err: serde_json::Error) -> Self {
        CmdbError::storage(format!("payload encoding: {err}"), false)
    }
}

//! Error taxonomy shared by the stores, the matcher and the facade.

use thiserror::Error;

pub type MessagingResult<T> = Result<T, MessagingError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// Caller-fixable input problem, shown to the user as is.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation on conversation creation or admin assignment.
    #[error("{0}")]
    Conflict(String),

    /// The store could not be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    TransientStore(String),
}

impl MessagingError {
    /// Stable machine-readable name, used by clients to localise the message.
    pub fn kind(&self) -> &'static str {
        match self {
            MessagingError::Validation(_) => "validation",
            MessagingError::AccessDenied(_) => "access_denied",
            MessagingError::NotFound(_) => "not_found",
            MessagingError::Conflict(_) => "conflict",
            MessagingError::TransientStore(_) => "transient_store",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MessagingError::Conflict(_))
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MessagingError::NotFound("record not found".to_owned()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                MessagingError::Conflict(db.message().to_owned())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                MessagingError::NotFound("referenced conversation does not exist".to_owned())
            }
            sqlx::Error::Database(db) if db.is_check_violation() => {
                MessagingError::Validation(db.message().to_owned())
            }
            other => MessagingError::TransientStore(other.to_string()),
        }
    }
}

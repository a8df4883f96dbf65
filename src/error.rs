//! Errors returned by database operations.

use http::StatusCode;

use crate::{digest::RevisionIdOverflow, rev_id::MalformedRevisionId};

/// Result type for database operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error returned by database operations.
///
/// None of these are retried internally. Whenever one of them is returned
/// from a write, the enclosing transaction has been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input: a bad document id, revision id, body or history.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The parent revision is not a current leaf, or a concurrent write won.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The referenced document or revision does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A validation callback rejected the revision.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The backing store failed.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The HTTP status code equivalent of this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn bad_request(msg: impl ToString) -> Self {
        Self::BadRequest(msg.to_string())
    }

    pub(crate) fn conflict(msg: impl ToString) -> Self {
        Self::Conflict(msg.to_string())
    }

    pub(crate) fn not_found(msg: impl ToString) -> Self {
        Self::NotFound(msg.to_string())
    }
}

impl From<MalformedRevisionId> for Error {
    fn from(value: MalformedRevisionId) -> Self {
        Self::bad_request(value)
    }
}

impl From<RevisionIdOverflow> for Error {
    fn from(value: RevisionIdOverflow) -> Self {
        Self::bad_request(value)
    }
}

/// Error returned by [`Store`](crate::store::Store) inserts.
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    /// A row with the same unique key already exists.
    #[error("duplicate key")]
    Duplicate,
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<InsertError> for Error {
    fn from(value: InsertError) -> Self {
        match value {
            InsertError::Duplicate => Self::conflict("revision already exists"),
            InsertError::Store(err) => Self::Internal(err),
        }
    }
}

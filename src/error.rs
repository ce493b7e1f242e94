//! # Error Handling
//!
//! Error types for S3-backed SQLite sessions. Every failure the core can
//! produce is distinguishable by variant so callers can tell a missing
//! bucket version apart from a transport drop or an engine error.

use thiserror::Error;

/// Main error type for S3-backed SQLite sessions
#[derive(Error, Debug)]
pub enum S3liteError {
    /// HEAD succeeded but the object carries no usable version id
    #[error("bucket versioning is not enabled: no usable x-amz-version-id on the object")]
    VersioningNotEnabled,

    /// Non-success HTTP status from the object store
    #[error("HTTP status {status} from {method} {url}")]
    HttpStatus {
        status: u16,
        method: &'static str,
        url: String,
    },

    /// Network or transport-level failure from the HTTP client
    #[error("transport error: {0}")]
    Transport(String),

    /// The credential provider could not produce credentials
    #[error("credentials error: {0}")]
    Credentials(String),

    /// libsqlite3 returned a non-OK result code
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// A row stream was used after its owning query scope closed
    #[error("query context closed: the statement has been finalized")]
    ContextClosed,

    /// The object URL could not be split into scheme, host and path
    #[error("invalid object URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for S3liteError {
    fn from(err: reqwest::Error) -> Self {
        S3liteError::Transport(err.to_string())
    }
}

/// Result type for S3-backed SQLite sessions
pub type S3liteResult<T> = Result<T, S3liteError>;

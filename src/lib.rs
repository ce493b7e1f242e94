//! # s3lite
//!
//! Read-only SQLite queries against a versioned object in an
//! S3-compatible store, without downloading the database file.
//!
//! A [`Session`] pins the object version that is current at open time
//! and registers a private SQLite VFS that satisfies every page read
//! with a signed HTTP range GET against that exact version. Queries in
//! one session therefore see a stable snapshot (REPEATABLE READ) even
//! while other clients overwrite the object.
//!
//! The bucket must have versioning enabled; opening a session against
//! an unversioned bucket fails with
//! [`S3liteError::VersioningNotEnabled`]. Writes of any kind are
//! rejected by the VFS.
//!
//! ```no_run
//! use s3lite::{Params, Session, SessionOptions};
//!
//! # fn main() -> s3lite::S3liteResult<()> {
//! let mut session = Session::open(
//!     "https://my-bucket.s3.eu-west-2.amazonaws.com/analytics.sqlite3",
//!     SessionOptions::default(),
//! )?;
//!
//! let mut rows = session.query("SELECT a, b FROM t ORDER BY a", Params::None)?;
//! println!("columns: {:?}", rows.columns());
//! while let Some(row) = rows.next_row()? {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Credentials come from the conventional `AWS_*` environment variables
//! by default and can be supplied per request through
//! [`SessionOptions::with_credentials_provider`]; the provider is called
//! for every signed request, so key rotation needs no session restart.

pub mod error;
pub mod s3;
pub mod session;
pub mod statement;

mod vfs;

pub use error::{S3liteError, S3liteResult};
pub use s3::{
    Credentials, CredentialsProvider, HttpClient, HttpClientProvider, HttpResponse, ObjectBinding,
    ObjectUrl, RangeReader, ReqwestClient,
};
pub use session::{Session, SessionOptions};
pub use statement::{Params, ResultStream, StatementSet, Value};

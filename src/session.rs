//! Session lifecycle: object resolution, VFS registration and the
//! engine handle.
//!
//! A session pins one object version at open and owns everything needed
//! to query it: the HTTP client, the VFS registration and the database
//! handle. Teardown runs in LIFO order on drop: statements are
//! finalized first (enforced by borrows), then the database closes,
//! then the VFS unregisters.

use std::ffi::{c_int, CStr, CString};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::ffi;
use tracing::{debug, warn};

use crate::error::{S3liteError, S3liteResult};
use crate::s3::constants::DEFAULT_TIMEOUT_SECS;
use crate::s3::credentials::{env_credentials, Credentials, CredentialsProvider};
use crate::s3::http::{HttpClient, HttpClientProvider, ReqwestClient};
use crate::s3::object::{ObjectBinding, ObjectUrl};
use crate::s3::range::RangeReader;
use crate::statement::{self, Params, ResultStream, StatementSet};
use crate::vfs::{VfsContext, VfsRegistration};

/// Configuration for opening a session
pub struct SessionOptions {
    credentials: CredentialsProvider,
    http_client: Option<HttpClientProvider>,
    timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            credentials: Box::new(env_credentials),
            http_client: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the credential provider; it is invoked per signed request
    #[must_use]
    pub fn with_credentials_provider(
        mut self,
        provider: impl Fn() -> S3liteResult<Credentials> + Send + 'static,
    ) -> Self {
        self.credentials = Box::new(provider);
        self
    }

    /// Supply a ready-made HTTP client instead of the reqwest default
    #[must_use]
    pub fn with_http_client(mut self, client: Box<dyn HttpClient>) -> Self {
        self.http_client = Some(Box::new(move || Ok(client)));
        self
    }

    /// Supply a callback constructing the session's HTTP client
    #[must_use]
    pub fn with_http_client_provider(
        mut self,
        provider: impl FnOnce() -> S3liteResult<Box<dyn HttpClient>> + Send + 'static,
    ) -> Self {
        self.http_client = Some(Box::new(provider));
        self
    }

    /// Request timeout used by the default HTTP client
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One pinned, queryable view of a versioned object.
///
/// A session is single-threaded: queries take `&mut self` so access is
/// serialized by the borrow checker. Separate sessions are fully
/// independent and may run on different threads concurrently.
pub struct Session {
    // Field order is teardown order: close the database before the VFS
    // it was opened through unregisters.
    db: DbHandle,
    context: Arc<VfsContext>,
    vfs: VfsRegistration,
}

// The handle is only ever used through &mut self and the engine runs
// with SQLITE_OPEN_NOMUTEX, so moving a session to another thread is
// sound as long as it stays on one thread at a time.
unsafe impl Send for Session {}

impl Session {
    /// Open a session against `url`, pinning the current object version.
    ///
    /// Fails before any query is possible when the bucket is not
    /// versioned, the object is unreachable, or the database cannot be
    /// opened through the session VFS.
    pub fn open(url: &str, options: SessionOptions) -> S3liteResult<Self> {
        let rc = unsafe { ffi::sqlite3_initialize() };
        if rc != ffi::SQLITE_OK {
            return Err(S3liteError::Sqlite(format!(
                "sqlite3_initialize failed with code {rc}"
            )));
        }

        let object_url = ObjectUrl::parse(url)?;
        let http: Box<dyn HttpClient> = match options.http_client {
            Some(provider) => provider()?,
            None => Box::new(ReqwestClient::new(options.timeout)?),
        };

        let binding = ObjectBinding::resolve(object_url, &options.credentials, http.as_ref())?;
        let reader = RangeReader::new(binding, options.credentials, http);
        let context = Arc::new(VfsContext::new(reader));
        let vfs = VfsRegistration::register(Arc::clone(&context))?;
        let db = open_database(&vfs, &context)?;

        debug!(vfs = vfs.name(), "session open");
        Ok(Self { db, context, vfs })
    }

    /// Run a single SQL statement and stream its rows.
    ///
    /// Only the first statement of `sql` is executed; use
    /// [`Session::query_multi`] for scripts.
    pub fn query(&mut self, sql: &str, params: Params) -> S3liteResult<ResultStream<'_>> {
        let sql = CString::new(sql)
            .map_err(|_| S3liteError::Sqlite("SQL text contains a NUL byte".to_string()))?;

        match statement::prepare(self, &sql, 0)? {
            None => Err(S3liteError::Sqlite(
                "no SQL statement to execute".to_string(),
            )),
            Some((stmt, _tail)) => {
                statement::bind_params(self, stmt.as_ptr(), &params)?;
                let columns = statement::column_names(stmt.as_ptr());
                let slot = std::rc::Rc::new(std::cell::RefCell::new(Some(stmt)));
                Ok(ResultStream::new(self, slot, columns))
            }
        }
    }

    /// Run a semicolon-separated script, one parameter set per statement.
    ///
    /// Statements are prepared lazily: the next head is only prepared
    /// once the previous stream is drained or abandoned.
    pub fn query_multi(&mut self, sql: &str, params: Vec<Params>) -> S3liteResult<StatementSet<'_>> {
        StatementSet::new(self, sql, params)
    }

    /// The pinned binding this session reads from
    pub fn binding(&self) -> &ObjectBinding {
        self.context.reader().binding()
    }

    pub(crate) fn db(&self) -> *mut ffi::sqlite3 {
        self.db.db
    }

    pub(crate) fn take_pending(&self) -> Option<S3liteError> {
        self.context.take_pending()
    }

    /// Map an engine result code, preferring a typed error stashed by
    /// the VFS over the engine's own message
    pub(crate) fn check(&self, rc: c_int) -> S3liteResult<()> {
        if let Some(err) = self.take_pending() {
            return Err(err);
        }
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(self.sqlite_error(rc))
        }
    }

    pub(crate) fn sqlite_error(&self, rc: c_int) -> S3liteError {
        let message = unsafe {
            let msg = ffi::sqlite3_errmsg(self.db.db);
            if msg.is_null() {
                CStr::from_ptr(ffi::sqlite3_errstr(rc))
                    .to_string_lossy()
                    .into_owned()
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            }
        };
        S3liteError::Sqlite(message)
    }
}

/// Owned `sqlite3*` closed on drop
struct DbHandle {
    db: *mut ffi::sqlite3,
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        if !self.db.is_null() {
            let rc = unsafe { ffi::sqlite3_close(self.db) };
            if rc != ffi::SQLITE_OK {
                warn!(code = rc, "sqlite3_close failed");
            }
        }
    }
}

/// Open the database through the session VFS.
///
/// The URI name is unique per session and marked immutable so the
/// engine never looks for journals or takes locks against the object.
fn open_database(vfs: &VfsRegistration, context: &Arc<VfsContext>) -> S3liteResult<DbHandle> {
    let uri = format!("file:/{name}-db?immutable=1&vfs={name}", name = vfs.name());
    let c_uri = CString::new(uri)
        .map_err(|_| S3liteError::Sqlite("database URI contains a NUL byte".to_string()))?;
    let c_vfs = CString::new(vfs.name())
        .map_err(|_| S3liteError::Sqlite("VFS name contains a NUL byte".to_string()))?;

    let flags = ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_URI | ffi::SQLITE_OPEN_NOMUTEX;
    let mut db: *mut ffi::sqlite3 = ptr::null_mut();
    let rc = unsafe { ffi::sqlite3_open_v2(c_uri.as_ptr(), &mut db, flags, c_vfs.as_ptr()) };

    if rc != ffi::SQLITE_OK {
        // A failed open can still hand back a handle that must be closed.
        let err = context.take_pending().unwrap_or_else(|| {
            let message = unsafe {
                if db.is_null() {
                    CStr::from_ptr(ffi::sqlite3_errstr(rc))
                        .to_string_lossy()
                        .into_owned()
                } else {
                    CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned()
                }
            };
            S3liteError::Sqlite(message)
        });
        if !db.is_null() {
            unsafe { ffi::sqlite3_close(db) };
        }
        return Err(err);
    }

    Ok(DbHandle { db })
}

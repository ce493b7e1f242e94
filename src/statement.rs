//! Prepared statement execution: parameter binding and row decoding.
//!
//! Statements are raw `sqlite3_stmt` handles owned by the query scope
//! that prepared them. Row streams hold a shared slot onto their
//! statement; when the scope finalizes it (moving on to the next
//! statement in a script, or dropping the scope), a stream that is
//! still alive reports the context as closed instead of touching a
//! dangling handle.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;
use std::rc::Rc;

use rusqlite::ffi;

use crate::error::{S3liteError, S3liteResult};
use crate::session::Session;

/// A single SQLite value, keyed by storage class
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

/// Parameters for one statement
#[derive(Debug, Clone, Default)]
pub enum Params {
    /// No parameters
    #[default]
    None,
    /// Values bound to indices 1..N in order
    Positional(Vec<Value>),
    /// `(":name", value)` pairs resolved through `bind_parameter_index`
    Named(Vec<(String, Value)>),
}

/// Owned raw statement handle, finalized on drop.
///
/// Finalize errors are swallowed: the only observed case is a malformed
/// database image, which has already surfaced as a step failure.
pub(crate) struct RawStatement {
    stmt: *mut ffi::sqlite3_stmt,
}

impl RawStatement {
    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.stmt
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            unsafe { ffi::sqlite3_finalize(self.stmt) };
        }
    }
}

/// Shared slot tying a row stream to the scope that owns the statement
pub(crate) type StatementSlot = Rc<RefCell<Option<RawStatement>>>;

/// Prepare the next statement of `sql` starting at byte `offset`.
///
/// Returns the statement and the offset of the unconsumed tail, or
/// `None` once only whitespace (or nothing) remains.
pub(crate) fn prepare(
    session: &Session,
    sql: &CStr,
    offset: usize,
) -> S3liteResult<Option<(RawStatement, usize)>> {
    let start = unsafe { sql.as_ptr().add(offset) };
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
    let mut tail: *const c_char = ptr::null();

    let rc = unsafe { ffi::sqlite3_prepare_v3(session.db(), start, -1, 0, &mut stmt, &mut tail) };
    session.check(rc)?;

    if stmt.is_null() {
        return Ok(None);
    }
    let next = unsafe { tail.offset_from(sql.as_ptr()) } as usize;
    Ok(Some((RawStatement { stmt }, next)))
}

/// Bind one parameter set to a freshly prepared statement
pub(crate) fn bind_params(
    session: &Session,
    stmt: *mut ffi::sqlite3_stmt,
    params: &Params,
) -> S3liteResult<()> {
    match params {
        Params::None => Ok(()),
        Params::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                bind_value(session, stmt, (i + 1) as c_int, value)?;
            }
            Ok(())
        }
        Params::Named(pairs) => {
            for (name, value) in pairs {
                let c_name = CString::new(name.as_str()).map_err(|_| {
                    S3liteError::Sqlite(format!("parameter name contains a NUL byte: {name}"))
                })?;
                let index = unsafe { ffi::sqlite3_bind_parameter_index(stmt, c_name.as_ptr()) };
                if index == 0 {
                    return Err(S3liteError::Sqlite(format!("unknown SQL parameter: {name}")));
                }
                bind_value(session, stmt, index, value)?;
            }
            Ok(())
        }
    }
}

fn bind_value(
    session: &Session,
    stmt: *mut ffi::sqlite3_stmt,
    index: c_int,
    value: &Value,
) -> S3liteResult<()> {
    let rc = match value {
        Value::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },
        Value::Integer(v) => unsafe { ffi::sqlite3_bind_int64(stmt, index, *v) },
        Value::Real(v) => unsafe { ffi::sqlite3_bind_double(stmt, index, *v) },
        Value::Text(v) => unsafe {
            ffi::sqlite3_bind_text(
                stmt,
                index,
                v.as_ptr() as *const c_char,
                v.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            )
        },
        Value::Blob(v) => unsafe {
            ffi::sqlite3_bind_blob(
                stmt,
                index,
                v.as_ptr() as *const c_void,
                v.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            )
        },
    };
    session.check(rc)
}

/// Column names captured from the prepared statement's result metadata
pub(crate) fn column_names(stmt: *mut ffi::sqlite3_stmt) -> Vec<String> {
    let count = unsafe { ffi::sqlite3_column_count(stmt) };
    (0..count)
        .map(|i| {
            let name = unsafe { ffi::sqlite3_column_name(stmt, i) };
            if name.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
            }
        })
        .collect()
}

/// Decode the current row, copying text and blob storage out before the
/// next step invalidates it
fn decode_row(stmt: *mut ffi::sqlite3_stmt, columns: usize) -> Vec<Value> {
    (0..columns as c_int)
        .map(|i| {
            match unsafe { ffi::sqlite3_column_type(stmt, i) } {
                ffi::SQLITE_INTEGER => {
                    Value::Integer(unsafe { ffi::sqlite3_column_int64(stmt, i) })
                }
                ffi::SQLITE_FLOAT => Value::Real(unsafe { ffi::sqlite3_column_double(stmt, i) }),
                ffi::SQLITE_TEXT => {
                    let text = unsafe { ffi::sqlite3_column_text(stmt, i) };
                    let len = unsafe { ffi::sqlite3_column_bytes(stmt, i) };
                    if text.is_null() || len <= 0 {
                        Value::Text(String::new())
                    } else {
                        let bytes =
                            unsafe { std::slice::from_raw_parts(text, len as usize) };
                        Value::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
                ffi::SQLITE_BLOB => {
                    let blob = unsafe { ffi::sqlite3_column_blob(stmt, i) };
                    let len = unsafe { ffi::sqlite3_column_bytes(stmt, i) };
                    if blob.is_null() || len <= 0 {
                        Value::Blob(Vec::new())
                    } else {
                        let bytes = unsafe {
                            std::slice::from_raw_parts(blob as *const u8, len as usize)
                        };
                        Value::Blob(bytes.to_vec())
                    }
                }
                _ => Value::Null,
            }
        })
        .collect()
}

/// Lazy, non-restartable stream of decoded rows for one statement
pub struct ResultStream<'s> {
    session: &'s Session,
    slot: StatementSlot,
    columns: Vec<String>,
    done: bool,
}

impl<'s> ResultStream<'s> {
    pub(crate) fn new(session: &'s Session, slot: StatementSlot, columns: Vec<String>) -> Self {
        Self {
            session,
            slot,
            columns,
            done: false,
        }
    }

    /// Column names, fixed for the life of the stream
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Fetch the next row, or `None` once the statement is done.
    ///
    /// Fails with [`S3liteError::ContextClosed`] when the owning query
    /// scope has already finalized the statement.
    pub fn next_row(&mut self) -> S3liteResult<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }

        let slot = self.slot.borrow();
        let stmt = match slot.as_ref() {
            Some(raw) => raw.as_ptr(),
            None => return Err(S3liteError::ContextClosed),
        };

        let rc = unsafe { ffi::sqlite3_step(stmt) };
        if let Some(err) = self.session.take_pending() {
            self.done = true;
            return Err(err);
        }

        match rc {
            ffi::SQLITE_ROW => Ok(Some(decode_row(stmt, self.columns.len()))),
            ffi::SQLITE_DONE => {
                self.done = true;
                Ok(None)
            }
            code => {
                self.done = true;
                Err(self.session.sqlite_error(code))
            }
        }
    }

    /// Drain the remaining rows into memory
    pub fn collect_rows(&mut self) -> S3liteResult<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Iterator for ResultStream<'_> {
    type Item = S3liteResult<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

/// Sequential driver over a semicolon-separated SQL script.
///
/// Each call to [`StatementSet::next_statement`] finalizes the previous
/// statement before preparing the next head, so a script is processed
/// one statement at a time in order.
pub struct StatementSet<'s> {
    session: &'s Session,
    sql: CString,
    offset: usize,
    params: std::vec::IntoIter<Params>,
    current: Option<StatementSlot>,
    exhausted: bool,
}

impl<'s> StatementSet<'s> {
    pub(crate) fn new(
        session: &'s Session,
        sql: &str,
        params: Vec<Params>,
    ) -> S3liteResult<Self> {
        let sql = CString::new(sql)
            .map_err(|_| S3liteError::Sqlite("SQL text contains a NUL byte".to_string()))?;
        Ok(Self {
            session,
            sql,
            offset: 0,
            params: params.into_iter(),
            current: None,
            exhausted: false,
        })
    }

    /// Prepare and bind the next statement of the script.
    ///
    /// Returns `None` once the script is exhausted. The previous
    /// statement is finalized first; a stream kept from it reports
    /// [`S3liteError::ContextClosed`] from then on.
    pub fn next_statement(&mut self) -> S3liteResult<Option<ResultStream<'s>>> {
        self.close_current();
        if self.exhausted {
            return Ok(None);
        }

        match prepare(self.session, &self.sql, self.offset)? {
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some((stmt, next_offset)) => {
                self.offset = next_offset;
                let params = self.params.next().unwrap_or_default();
                bind_params(self.session, stmt.as_ptr(), &params)?;
                let columns = column_names(stmt.as_ptr());

                let slot: StatementSlot = Rc::new(RefCell::new(Some(stmt)));
                self.current = Some(Rc::clone(&slot));
                Ok(Some(ResultStream::new(self.session, slot, columns)))
            }
        }
    }

    fn close_current(&mut self) {
        if let Some(slot) = self.current.take() {
            // Dropping the RawStatement finalizes it; any stream still
            // holding this slot sees an empty slot afterwards.
            slot.borrow_mut().take();
        }
    }
}

impl Drop for StatementSet<'_> {
    fn drop(&mut self) {
        self.close_current();
    }
}

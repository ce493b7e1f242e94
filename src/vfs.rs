//! SQLite VFS adapter backed by version-pinned range reads.
//!
//! Each session registers its own uniquely named VFS whose only
//! capability is reading the main database file through a
//! [`RangeReader`]. Journals, WAL, temporary files, shared memory and
//! every write path are refused, so the engine treats the object as an
//! immutable read-only medium.
//!
//! The session context hangs off the VFS `pAppData` slot and is copied
//! into each opened file handle; transport failures inside a read are
//! stashed there and re-surfaced as typed errors by the session once
//! the engine call returns.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::mem;
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use rusqlite::ffi;
use tracing::{debug, warn};

use crate::error::S3liteError;
use crate::s3::range::RangeReader;

/// Sector size reported to the engine
const SECTOR_SIZE: c_int = 512;

/// Longest pathname the VFS claims to support
const MAX_PATHNAME: c_int = 1024;

/// Monotonic part of each registration name
static REGISTRATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-session state reachable from the VFS appdata slot
pub(crate) struct VfsContext {
    reader: RangeReader,
    pending: Mutex<Option<S3liteError>>,
}

impl VfsContext {
    pub(crate) fn new(reader: RangeReader) -> Self {
        Self {
            reader,
            pending: Mutex::new(None),
        }
    }

    fn set_pending(&self, err: S3liteError) {
        if let Ok(mut slot) = self.pending.lock() {
            *slot = Some(err);
        }
    }

    /// Take the error stashed by the last failing VFS callback, if any
    pub(crate) fn take_pending(&self) -> Option<S3liteError> {
        self.pending.lock().ok().and_then(|mut slot| slot.take())
    }

    pub(crate) fn reader(&self) -> &RangeReader {
        &self.reader
    }
}

/// File handle layout handed to the engine.
///
/// The base file must be the first member: the engine only knows about
/// `sqlite3_file` and we recover the rest by pointer cast.
#[repr(C)]
struct S3File {
    base: ffi::sqlite3_file,
    context: *const VfsContext,
}

/// RAII registration of a uniquely named session VFS.
///
/// The VFS is never made the default and is unregistered on drop, so
/// concurrent sessions only ever see their own name in the registry.
pub(crate) struct VfsRegistration {
    vfs: Box<ffi::sqlite3_vfs>,
    name: CString,
    context: *const VfsContext,
}

// The raw pointers target heap allocations owned by this registration;
// everything behind them is Send and only touched from the session's
// thread.
unsafe impl Send for VfsRegistration {}

impl VfsRegistration {
    /// Register a fresh VFS wired to the session context
    pub(crate) fn register(context: Arc<VfsContext>) -> Result<Self, S3liteError> {
        let sequence = REGISTRATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nonce: u64 = rand::rng().random();
        let name = CString::new(format!("s3lite-{sequence}-{nonce:016x}"))
            .expect("registration names contain no NUL bytes");

        let context_ptr = Arc::into_raw(context);

        let mut vfs: Box<ffi::sqlite3_vfs> = Box::new(unsafe { mem::zeroed() });
        vfs.iVersion = 1;
        vfs.szOsFile = mem::size_of::<S3File>() as c_int;
        vfs.mxPathname = MAX_PATHNAME;
        vfs.zName = name.as_ptr();
        vfs.pAppData = context_ptr as *mut c_void;
        vfs.xOpen = Some(x_open);
        vfs.xDelete = Some(x_delete);
        vfs.xAccess = Some(x_access);
        vfs.xFullPathname = Some(x_full_pathname);
        vfs.xRandomness = Some(x_randomness);
        vfs.xSleep = Some(x_sleep);
        vfs.xCurrentTime = Some(x_current_time);

        let rc = unsafe { ffi::sqlite3_vfs_register(vfs.as_mut(), 0) };
        if rc != ffi::SQLITE_OK {
            unsafe { drop(Arc::from_raw(context_ptr)) };
            return Err(S3liteError::Sqlite(format!(
                "sqlite3_vfs_register failed with code {rc}"
            )));
        }

        debug!(name = ?name, "registered session VFS");
        Ok(Self {
            vfs,
            name,
            context: context_ptr,
        })
    }

    /// The registration name to open the database with
    pub(crate) fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }
}

impl Drop for VfsRegistration {
    fn drop(&mut self) {
        let rc = unsafe { ffi::sqlite3_vfs_unregister(self.vfs.as_mut()) };
        if rc != ffi::SQLITE_OK {
            warn!(code = rc, "sqlite3_vfs_unregister failed");
        }
        unsafe { drop(Arc::from_raw(self.context)) };
        debug!(name = ?self.name, "unregistered session VFS");
    }
}

static S3_IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    // Version 1 of the table: WAL shared memory and mmap entry points
    // do not exist, so the engine cannot request them.
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

unsafe extern "C" fn x_open(
    p_vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
    p_file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    let file = p_file as *mut S3File;
    // Install the method table before any early return: the engine
    // calls xClose on handles whose pMethods is set, even when the
    // open itself failed.
    (*file).base.pMethods = &S3_IO_METHODS;
    (*file).context = ptr::null();

    // Only the main database is readable; journals, WAL and temporary
    // files do not exist on an immutable remote object.
    if flags & ffi::SQLITE_OPEN_MAIN_DB == 0 {
        return ffi::SQLITE_CANTOPEN;
    }

    (*file).context = (*p_vfs).pAppData as *const VfsContext;
    if !p_out_flags.is_null() {
        *p_out_flags = flags;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_close(_p_file: *mut ffi::sqlite3_file) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_read(
    p_file: *mut ffi::sqlite3_file,
    p_out: *mut c_void,
    i_amt: c_int,
    i_ofst: ffi::sqlite3_int64,
) -> c_int {
    let context = (*(p_file as *mut S3File)).context;
    if context.is_null() || i_amt < 0 || i_ofst < 0 {
        return ffi::SQLITE_IOERR;
    }
    // A zero-byte read has nothing to fetch; an inclusive byte range
    // cannot even express it.
    if i_amt == 0 {
        return ffi::SQLITE_OK;
    }
    let context = &*context;
    let amount = i_amt as u64;
    let offset = i_ofst as u64;
    let out = slice::from_raw_parts_mut(p_out as *mut u8, i_amt as usize);
    let length = context.reader.binding().length;

    // The engine probes past EOF while sizing the header; unused tail
    // bytes must be zeroed.
    if offset >= length {
        out.fill(0);
        return ffi::SQLITE_IOERR_SHORT_READ;
    }

    let available = amount.min(length - offset);
    match context.reader.read(offset, available) {
        Ok(bytes) => {
            out[..bytes.len()].copy_from_slice(&bytes);
            if available < amount {
                out[bytes.len()..].fill(0);
                return ffi::SQLITE_IOERR_SHORT_READ;
            }
            ffi::SQLITE_OK
        }
        Err(err) => {
            context.set_pending(err);
            ffi::SQLITE_IOERR
        }
    }
}

unsafe extern "C" fn x_write(
    _p_file: *mut ffi::sqlite3_file,
    _p_data: *const c_void,
    _i_amt: c_int,
    _i_ofst: ffi::sqlite3_int64,
) -> c_int {
    ffi::SQLITE_READONLY
}

unsafe extern "C" fn x_truncate(
    _p_file: *mut ffi::sqlite3_file,
    _size: ffi::sqlite3_int64,
) -> c_int {
    ffi::SQLITE_READONLY
}

unsafe extern "C" fn x_sync(_p_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    ffi::SQLITE_IOERR
}

unsafe extern "C" fn x_file_size(
    p_file: *mut ffi::sqlite3_file,
    p_size: *mut ffi::sqlite3_int64,
) -> c_int {
    let context = (*(p_file as *mut S3File)).context;
    if context.is_null() || p_size.is_null() {
        return ffi::SQLITE_IOERR;
    }
    *p_size = (*context).reader.binding().length as ffi::sqlite3_int64;
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_lock(_p_file: *mut ffi::sqlite3_file, _e_lock: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_unlock(_p_file: *mut ffi::sqlite3_file, _e_lock: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_check_reserved_lock(
    _p_file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    if !p_res_out.is_null() {
        *p_res_out = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_control(
    _p_file: *mut ffi::sqlite3_file,
    _op: c_int,
    _p_arg: *mut c_void,
) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_sector_size(_p_file: *mut ffi::sqlite3_file) -> c_int {
    SECTOR_SIZE
}

unsafe extern "C" fn x_device_characteristics(_p_file: *mut ffi::sqlite3_file) -> c_int {
    ffi::SQLITE_IOCAP_IMMUTABLE
}

unsafe extern "C" fn x_access(
    _p_vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
    _flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    // No auxiliary file ever exists, so the engine never tries to open
    // a journal or WAL.
    if !p_res_out.is_null() {
        *p_res_out = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_delete(
    _p_vfs: *mut ffi::sqlite3_vfs,
    _z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_full_pathname(
    _p_vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    // The path is opaque to this VFS; pass it through unchanged.
    let name = CStr::from_ptr(z_name).to_bytes_with_nul();
    if n_out < 0 || name.len() > n_out as usize {
        return ffi::SQLITE_CANTOPEN;
    }
    ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, z_out, name.len());
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_randomness(
    _p_vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    if n_byte <= 0 || z_out.is_null() {
        return 0;
    }
    let out = slice::from_raw_parts_mut(z_out as *mut u8, n_byte as usize);
    rand::rng().fill(out);
    n_byte
}

unsafe extern "C" fn x_sleep(_p_vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    if microseconds > 0 {
        std::thread::sleep(Duration::from_micros(microseconds as u64));
    }
    microseconds
}

unsafe extern "C" fn x_current_time(_p_vfs: *mut ffi::sqlite3_vfs, p_time: *mut f64) -> c_int {
    if p_time.is_null() {
        return ffi::SQLITE_IOERR;
    }
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    // Julian day number of the Unix epoch is 2440587.5
    *p_time = unix.as_secs_f64() / 86400.0 + 2440587.5;
    ffi::SQLITE_OK
}

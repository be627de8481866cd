//! Segment manager: allocation, naming, and destruction of shared-memory
//! segments.
//!
//! Segments are POSIX shared-memory objects (`shm_open`). The object name
//! doubles as the segment's exchangeable key: once delivered to another
//! process over an out-of-band control channel, it is sufficient for
//! [`Mapping::attach_key`](crate::map::Mapping::attach_key).

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use glimpse_core::Error;
use tracing::debug;

/// Process-global counter; keys are never reused for a different segment
/// within the same machine session (pid + counter).
static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates, names, and destroys shared-memory segments.
///
/// Each instance tracks only its own process's view: mapping counts are
/// shared between a [`Segment`] and the [`Mapping`](crate::map::Mapping)s
/// attached from this process, and nothing attempts to observe mappings
/// held elsewhere.
#[derive(Debug, Default)]
pub struct SegmentManager {
    _priv: (),
}

impl SegmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a shared-memory segment of at least `size` bytes.
    ///
    /// Fails with `InvalidArgument` for a zero size and `ResourceExhausted`
    /// when the platform shared-memory namespace or memory limits are
    /// exceeded.
    pub fn create(&self, size: usize) -> Result<Segment, Error> {
        if size == 0 {
            return Err(Error::InvalidArgument("segment size must be > 0"));
        }

        // EEXIST can only happen if a previous process with the same pid
        // leaked an object; bump the counter and retry.
        for _ in 0..8 {
            let id = NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed);
            let key = format!("/glimpse-{}-{:x}", std::process::id(), id);
            match shm_create(&key, size) {
                Ok(fd) => {
                    debug!(key = %key, size, "created segment");
                    return Ok(Segment {
                        key,
                        fd,
                        size,
                        map_count: Arc::new(AtomicUsize::new(0)),
                        destroyed: AtomicBool::new(false),
                    });
                }
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => continue,
                Err(e) => return Err(os_error("shm_open", &key, e)),
            }
        }
        Err(Error::ResourceExhausted {
            what: "shared-memory namespace: could not find a free segment name".into(),
            required: None,
        })
    }

    /// Release a segment.
    ///
    /// Fails with `InvalidState` if the segment is still mapped in the
    /// calling process; mappings held by other processes are not detected
    /// and destroying a segment mapped elsewhere is unsupported.
    pub fn destroy(&self, segment: &Segment) -> Result<(), Error> {
        let mapped = segment.map_count.load(Ordering::Acquire);
        if mapped != 0 {
            return Err(Error::InvalidState(
                "segment is still mapped in this process; detach first",
            ));
        }
        if segment.destroyed.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidState("segment already destroyed"));
        }
        shm_unlink(&segment.key);
        debug!(key = %segment.key, "destroyed segment");
        Ok(())
    }
}

/// A process-local handle to a shared-memory segment.
///
/// The handle owns the underlying file descriptor. Dropping an undestroyed
/// segment unlinks the object as a best-effort cleanup, so segments do not
/// accumulate in the platform namespace when a producer forgets to call
/// [`SegmentManager::destroy`].
#[derive(Debug)]
pub struct Segment {
    key: String,
    fd: OwnedFd,
    size: usize,
    map_count: Arc<AtomicUsize>,
    destroyed: AtomicBool,
}

impl Segment {
    /// The exchangeable key identifying this segment machine-wide.
    ///
    /// Stable and transport-safe; valid for the segment's lifetime and never
    /// reused for a different segment within the same machine session.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Segment size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Map this segment into the calling process; convenience for
    /// [`Mapping::attach`](crate::map::Mapping::attach).
    pub fn attach(&self) -> Result<crate::map::Mapping, Error> {
        crate::map::Mapping::attach(self)
    }

    pub(crate) fn raw_fd(&self) -> i32 {
        self.fd.as_raw_fd()
    }

    pub(crate) fn map_count(&self) -> &Arc<AtomicUsize> {
        &self.map_count
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Acquire) {
            shm_unlink(&self.key);
            debug!(key = %self.key, "unlinked leaked segment on drop");
        }
    }
}

fn shm_create(key: &str, size: usize) -> io::Result<OwnedFd> {
    let name = CString::new(key).expect("segment keys contain no NUL");
    // SAFETY: `name` is a valid NUL-terminated string; O_EXCL guarantees we
    // never adopt an object created by someone else.
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600 as libc::mode_t,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly opened, owned descriptor.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    // SAFETY: fd is valid; ftruncate sizes the object.
    let rc = unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        shm_unlink(key);
        return Err(err);
    }
    Ok(fd)
}

fn shm_unlink(key: &str) {
    if let Ok(name) = CString::new(key) {
        // SAFETY: valid NUL-terminated string; failure (already unlinked)
        // is not actionable here.
        unsafe {
            libc::shm_unlink(name.as_ptr());
        }
    }
}

/// Map an OS error onto the fixed taxonomy.
pub(crate) fn os_error(op: &'static str, key: &str, err: io::Error) -> Error {
    match err.raw_os_error() {
        Some(libc::ENOENT) => Error::NotFound(format!("{op} {key}: no such segment")),
        Some(libc::EACCES) | Some(libc::EPERM) => {
            Error::PermissionDenied(format!("{op} {key}: {err}"))
        }
        _ => Error::ResourceExhausted {
            what: format!("{op} {key}: {err}"),
            required: None,
        },
    }
}

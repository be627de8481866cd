//! Attachment layer: maps segments into the calling process.
//!
//! A [`Mapping`] pairs a segment with a base address in the current
//! process's address space. Mappings are never shared across processes;
//! each process performs its own attach, either from an owned
//! [`Segment`](crate::segment::Segment) or from a key exchanged
//! out-of-band.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glimpse_core::Error;
use tracing::debug;

use crate::segment::{Segment, os_error};

/// A segment mapped into this process's address space.
///
/// The base address is chosen by the platform, never fixed. A mapping is
/// detached exactly once: [`detach`](Mapping::detach) consumes the value,
/// and dropping an undetached mapping unmaps it. Either way the address is
/// invalid afterwards; holding raw pointers past that point is undefined
/// behavior by contract.
#[derive(Debug)]
pub struct Mapping {
    base: NonNull<u8>,
    len: usize,
    key: String,
    /// Present when attached from an owned segment; keeps the in-process
    /// mapping count that guards destroy-while-mapped.
    map_count: Option<Arc<AtomicUsize>>,
}

// SAFETY: the mapped region is plain shared memory; all cross-thread and
// cross-process coordination goes through the atomics in the frame header.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Map an owned segment into this process.
    pub fn attach(segment: &Segment) -> Result<Self, Error> {
        if segment.is_destroyed() {
            return Err(Error::NotFound(format!(
                "segment {} has been destroyed",
                segment.key()
            )));
        }
        let base = mmap_shared(segment.raw_fd(), segment.size())
            .map_err(|e| os_error("mmap", segment.key(), e))?;
        let count = segment.map_count().clone();
        count.fetch_add(1, Ordering::AcqRel);
        debug!(key = %segment.key(), len = segment.size(), "attached segment");
        Ok(Self {
            base,
            len: segment.size(),
            key: segment.key().to_string(),
            map_count: Some(count),
        })
    }

    /// Map a segment created by another process, located by its exchanged
    /// key.
    ///
    /// Fails with `NotFound` if no live segment matches the key,
    /// `PermissionDenied` if the platform refuses access, and
    /// `ResourceExhausted` if address space cannot be reserved.
    pub fn attach_key(key: &str) -> Result<Self, Error> {
        validate_key(key)?;
        let name = CString::new(key).expect("validated key contains no NUL");
        // SAFETY: `name` is valid and NUL-terminated; no O_CREAT, so this
        // only resolves objects that already exist.
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(os_error("shm_open", key, io::Error::last_os_error()));
        }
        // SAFETY: freshly opened, owned descriptor. Closed on return; the
        // mapping outlives the descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is valid and stat points to writable memory.
        let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) };
        if rc != 0 {
            return Err(os_error("fstat", key, io::Error::last_os_error()));
        }
        let len = stat.st_size as usize;
        if len == 0 {
            return Err(Error::NotFound(format!("{key}: segment has zero size")));
        }

        let base = mmap_shared(fd.as_raw_fd(), len).map_err(|e| os_error("mmap", key, e))?;
        debug!(key = %key, len, "attached foreign segment");
        Ok(Self {
            base,
            len,
            key: key.to_string(),
            map_count: None,
        })
    }

    /// Base address of the mapping.
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key of the underlying segment.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// View the mapped bytes as a slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other process writes the viewed range for
    /// the lifetime of the slice (e.g. by being the sole producer, or by
    /// reading under the frame header seqlock and re-validating afterwards).
    pub unsafe fn as_slice(&self) -> &[u8] {
        // SAFETY: base/len describe a live mapping; aliasing discipline is
        // the caller's obligation per above.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// Unmap, consuming the mapping.
    ///
    /// Equivalent to dropping, but surfaces the (rare) platform error.
    pub fn detach(mut self) -> Result<(), Error> {
        self.release()
    }

    fn release(&mut self) -> Result<(), Error> {
        if self.len == 0 {
            return Ok(());
        }
        // SAFETY: base/len came from a successful mmap and are unmapped
        // exactly once (len is zeroed below).
        let rc = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) };
        self.len = 0;
        if let Some(count) = self.map_count.take() {
            count.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(key = %self.key, "detached segment");
        if rc != 0 {
            return Err(Error::InvalidState("munmap failed for a live mapping"));
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn mmap_shared(fd: i32, len: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: fd refers to a shm object of at least `len` bytes; the
    // address is chosen by the platform (first argument null).
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(NonNull::new(addr as *mut u8).expect("mmap returned non-null"))
}

fn validate_key(key: &str) -> Result<(), Error> {
    let rest = key
        .strip_prefix('/')
        .ok_or(Error::InvalidArgument("segment key must start with '/'"))?;
    if rest.is_empty() || rest.contains('/') || rest.contains('\0') || key.len() >= 255 {
        return Err(Error::InvalidArgument("malformed segment key"));
    }
    Ok(())
}

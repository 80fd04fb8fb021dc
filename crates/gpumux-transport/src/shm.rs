//! POSIX shared-memory segments (development backend).
//!
//! Segments are named by the zone pair so that two independent
//! processes agree on the mapping without any rendezvous beyond the
//! zone ids themselves. Both sides open with `O_CREAT`; the server
//! role sizes the segment and unlinks the name on drop.

use std::ffi::CString;
use std::ptr::NonNull;

use crate::error::TransportError;

/// One mapped shared-memory segment.
pub(crate) struct ShmSegment {
    base: NonNull<u8>,
    len: usize,
    name: CString,
    unlink_on_drop: bool,
}

// SAFETY: the mapping is process-global; the ring protocol on top
// governs concurrent access.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Open (creating if absent) and map the named segment.
    pub fn open(name: &str, len: usize, unlink_on_drop: bool) -> Result<Self, TransportError> {
        let c_name = CString::new(name)
            .map_err(|_| TransportError::Init(format!("bad segment name: {name}")))?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe {
            libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600 as libc::mode_t)
        };
        if fd < 0 {
            return Err(TransportError::Init(format!(
                "shm_open({name}) failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        // Idempotent: growing an already-sized segment to the same
        // length is a no-op, so both sides may call this.
        // SAFETY: fd is the descriptor just opened.
        let rc = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd is still open.
            unsafe {
                libc::close(fd);
            }
            return Err(TransportError::Init(format!("ftruncate({name}) failed: {err}")));
        }

        // SAFETY: fd is open and sized; we request a fresh mapping.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The mapping keeps the segment alive without the descriptor.
        // SAFETY: fd is still open.
        unsafe {
            libc::close(fd);
        }
        if raw == libc::MAP_FAILED {
            return Err(TransportError::Init(format!(
                "mmap({name}) failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        #[allow(clippy::expect_used)]
        let base = NonNull::new(raw.cast::<u8>()).expect("mmap returned non-null on success");

        Ok(Self { base, len, name: c_name, unlink_on_drop })
    }

    /// Base pointer of the mapping.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly what mmap returned; the name was
        // opened by us and unlinking is idempotent across crashes.
        unsafe {
            libc::munmap(self.base.as_ptr().cast::<libc::c_void>(), self.len);
            if self.unlink_on_drop {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

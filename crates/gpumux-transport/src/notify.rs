//! Event-channel notification primitives.
//!
//! A notifier carries no data; it only tells a receiver "look at your
//! ring". Spurious wake-ups are allowed by contract — the receive path
//! re-checks the ring after every wake and treats an empty ring as a
//! timeout.

use std::ffi::CString;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Result of waiting on a notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The notifier fired (possibly spuriously).
    Signaled,
    /// The wait budget elapsed.
    TimedOut,
}

/// Backend-selected notifier for one receiving endpoint.
pub(crate) enum Notifier {
    /// In-process condvar event (memory backend).
    Local(Arc<LocalEvent>),
    /// POSIX named semaphore (shm backend).
    Sem(SemEvent),
}

impl Notifier {
    /// Wake the endpoint waiting on this notifier.
    pub fn signal(&self) {
        match self {
            Self::Local(event) => event.signal(),
            Self::Sem(event) => event.signal(),
        }
    }

    /// Wait up to `timeout_ms` for a signal.
    ///
    /// Negative means wait forever, zero means poll without blocking.
    pub fn wait(&self, timeout_ms: i32) -> WaitOutcome {
        match self {
            Self::Local(event) => event.wait(timeout_ms),
            Self::Sem(event) => event.wait(timeout_ms),
        }
    }
}

/// Counting event built from a mutex and condvar.
///
/// Counts pending signals so a signal sent before the waiter arrives
/// is not lost, mirroring semaphore semantics.
#[derive(Default)]
pub(crate) struct LocalEvent {
    pending: Mutex<u64>,
    cv: Condvar,
}

impl LocalEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut pending =
            self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *pending += 1;
        self.cv.notify_one();
    }

    pub fn wait(&self, timeout_ms: i32) -> WaitOutcome {
        let mut pending =
            self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if timeout_ms == 0 {
            if *pending > 0 {
                *pending -= 1;
                return WaitOutcome::Signaled;
            }
            return WaitOutcome::TimedOut;
        }

        if timeout_ms < 0 {
            while *pending == 0 {
                pending = self
                    .cv
                    .wait(pending)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            *pending -= 1;
            return WaitOutcome::Signaled;
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        while *pending == 0 {
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            pending = self
                .cv
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
        *pending -= 1;
        WaitOutcome::Signaled
    }
}

/// POSIX named semaphore, keyed by the receiving zone.
///
/// Both endpoints open the semaphore with `O_CREAT`; whichever side
/// arrives first creates it. The server role unlinks the name on drop
/// so a crashed session does not leave stale counts for the next one.
pub(crate) struct SemEvent {
    sem: *mut libc::sem_t,
    name: CString,
    unlink_on_drop: bool,
}

// SAFETY: sem_post/sem_wait are thread-safe on the same sem_t; the
// raw pointer is only ever used through those calls.
unsafe impl Send for SemEvent {}

impl SemEvent {
    /// Open (creating if absent) the named semaphore.
    pub fn open(name: &str, unlink_on_drop: bool) -> Result<Self, TransportError> {
        let c_name = CString::new(name)
            .map_err(|_| TransportError::Init(format!("bad semaphore name: {name}")))?;

        // SAFETY: c_name is a valid NUL-terminated string; mode and
        // initial value are plain integers.
        let sem = unsafe {
            libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o600 as libc::c_uint, 0 as libc::c_uint)
        };
        if sem == libc::SEM_FAILED {
            return Err(TransportError::Init(format!(
                "sem_open({name}) failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self { sem, name: c_name, unlink_on_drop })
    }

    pub fn signal(&self) {
        // SAFETY: self.sem is a live semaphore until drop.
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    pub fn wait(&self, timeout_ms: i32) -> WaitOutcome {
        if timeout_ms == 0 {
            // SAFETY: live semaphore; sem_trywait never blocks.
            let rc = unsafe { libc::sem_trywait(self.sem) };
            return if rc == 0 { WaitOutcome::Signaled } else { WaitOutcome::TimedOut };
        }

        if timeout_ms < 0 {
            loop {
                // SAFETY: live semaphore.
                let rc = unsafe { libc::sem_wait(self.sem) };
                if rc == 0 {
                    return WaitOutcome::Signaled;
                }
                if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                    return WaitOutcome::TimedOut;
                }
            }
        }

        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: ts is a valid out-pointer.
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &raw mut ts);
        }
        ts.tv_sec += i64::from(timeout_ms) / 1000;
        ts.tv_nsec += (i64::from(timeout_ms) % 1000) * 1_000_000;
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }

        loop {
            // SAFETY: live semaphore; ts is a valid absolute deadline.
            let rc = unsafe { libc::sem_timedwait(self.sem, &raw const ts) };
            if rc == 0 {
                return WaitOutcome::Signaled;
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => {},
                _ => return WaitOutcome::TimedOut,
            }
        }
    }
}

impl Drop for SemEvent {
    fn drop(&mut self) {
        // SAFETY: closing and (for the creator) unlinking a semaphore
        // we opened; the pointer is not used afterwards.
        unsafe {
            libc::sem_close(self.sem);
            if self.unlink_on_drop {
                libc::sem_unlink(self.name.as_ptr());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_event_counts_pending_signals() {
        let event = LocalEvent::new();
        event.signal();
        event.signal();

        assert_eq!(event.wait(0), WaitOutcome::Signaled);
        assert_eq!(event.wait(0), WaitOutcome::Signaled);
        assert_eq!(event.wait(0), WaitOutcome::TimedOut);
    }

    #[test]
    fn local_event_times_out() {
        let event = LocalEvent::new();
        let start = Instant::now();
        assert_eq!(event.wait(30), WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn local_event_wakes_waiter() {
        let event = Arc::new(LocalEvent::new());
        let waker = Arc::clone(&event);

        let handle = std::thread::spawn(move || event.wait(5000));
        std::thread::sleep(Duration::from_millis(20));
        waker.signal();

        assert_eq!(handle.join().expect("waiter panicked"), WaitOutcome::Signaled);
    }
}

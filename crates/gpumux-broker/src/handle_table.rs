//! The handle table: the broker's security kernel.
//!
//! Maps opaque 64-bit handles to device allocations under strict
//! per-zone ownership. Every request that names a handle is authorized
//! here, and an unauthorized access is indistinguishable from a
//! missing handle — a distinct answer would let a tenant probe the
//! handle space for other tenants' live handles.
//!
//! # Invariants
//!
//! - Handle values are unique for the lifetime of the table and never
//!   zero (zero is the null handle on the wire).
//! - Ownership is immutable: the owner zone is set at insertion and
//!   never changes.
//! - `remove` unlinks atomically under the table lock, so a removed
//!   handle can never be observed by a concurrent `lookup` and
//!   double-free attacks find nothing.
//! - Statistics count exactly the live records.

use std::collections::HashMap;
use std::sync::Mutex;

use gpumux_proto::ZoneId;

/// One live device allocation.
struct HandleRecord<A> {
    owner: ZoneId,
    resource: A,
    size: u64,
}

struct TableInner<A> {
    records: HashMap<u64, HandleRecord<A>>,
    next_handle: u64,
    total_bytes: u64,
}

/// Snapshot of the table statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Number of live handles.
    pub handles: u64,
    /// Sum of live allocation sizes in bytes.
    pub bytes: u64,
}

/// Ownership-indexed map from handles to device allocations.
///
/// Thread-safe; every operation takes the table lock for its (short)
/// duration. `A` is the driver's allocation reference, cloned out to
/// the dispatcher for the duration of one request.
pub struct HandleTable<A> {
    inner: Mutex<TableInner<A>>,
}

impl<A: Clone> Default for HandleTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone> HandleTable<A> {
    /// Create an empty table. The first handle issued is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                records: HashMap::new(),
                next_handle: 1,
                total_bytes: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableInner<A>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a new allocation owned by `owner`.
    ///
    /// Returns the new handle, or 0 if the handle space is exhausted
    /// (2^64 - 1 insertions; unreachable in practice).
    pub fn insert(&self, owner: ZoneId, resource: A, size: u64) -> u64 {
        let mut inner = self.lock();

        let handle = inner.next_handle;
        let Some(next) = handle.checked_add(1) else {
            return 0;
        };
        inner.next_handle = next;

        inner.records.insert(handle, HandleRecord { owner, resource, size });
        inner.total_bytes += size;

        tracing::debug!(%owner, handle, size, "handle created");
        handle
    }

    /// Resolve a handle on behalf of `requester`.
    ///
    /// Returns the allocation reference and recorded size, or `None`
    /// if the handle does not exist *or* belongs to another zone. The
    /// two cases are deliberately indistinguishable to the caller;
    /// only the security log tells them apart.
    pub fn lookup(&self, requester: ZoneId, handle: u64) -> Option<(A, u64)> {
        let inner = self.lock();
        let record = inner.records.get(&handle)?;

        if record.owner != requester {
            tracing::warn!(
                %requester,
                owner = %record.owner,
                handle,
                "denied access to foreign handle"
            );
            return None;
        }

        Some((record.resource.clone(), record.size))
    }

    /// Unlink a handle on behalf of `requester`, returning the
    /// allocation for the caller to release.
    ///
    /// Authorization matches [`Self::lookup`]. Idempotent against
    /// double-free: a second remove of the same handle finds nothing.
    pub fn remove(&self, requester: ZoneId, handle: u64) -> Option<A> {
        let mut inner = self.lock();

        let record = inner.records.get(&handle)?;
        if record.owner != requester {
            tracing::warn!(
                %requester,
                owner = %record.owner,
                handle,
                "denied removal of foreign handle"
            );
            return None;
        }

        #[allow(clippy::expect_used)]
        let record = inner.records.remove(&handle).expect("present under the same lock");
        inner.total_bytes -= record.size;

        tracing::debug!(%requester, handle, size = record.size, "handle destroyed");
        Some(record.resource)
    }

    /// Snapshot of live-handle statistics.
    pub fn stats(&self) -> TableStats {
        let inner = self.lock();
        TableStats { handles: inner.records.len() as u64, bytes: inner.total_bytes }
    }

    /// Remove every record, returning the allocations for release.
    /// Used at broker shutdown.
    pub fn drain(&self) -> Vec<A> {
        let mut inner = self.lock();
        inner.total_bytes = 0;
        inner.records.drain().map(|(_, record)| record.resource).collect()
    }
}

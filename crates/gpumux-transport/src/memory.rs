//! In-process memory backend.
//!
//! Provides the same mapped-region contract as the shm backend but
//! inside a single process: both endpoints of a [`MemoryLink`] see the
//! same heap segments and wake each other through condvar events.
//! Tests and single-process simulations connect a broker thread and a
//! client thread this way without touching the OS.

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;
use std::sync::Arc;

use gpumux_proto::ZoneId;

use crate::notify::LocalEvent;
use crate::ring::RING_BYTES;

/// A fixed, zero-initialized, 64-byte-aligned heap region.
pub(crate) struct SharedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region itself is inert bytes; all concurrent access
// discipline lives in the ring protocol layered on top.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocate `len` zeroed bytes aligned to a cache line.
    pub fn zeroed(len: usize) -> Self {
        #[allow(clippy::expect_used)]
        let layout = Layout::from_size_align(len, 64).expect("region layout is valid");
        // SAFETY: layout has nonzero size for every caller in this
        // crate.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }

    /// Base pointer of the region.
    pub fn base(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/layout are exactly what alloc_zeroed returned.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

struct LinkInner {
    server: ZoneId,
    client: ZoneId,
    /// Ring written by the server, read by the client.
    server_to_client: SharedRegion,
    /// Ring written by the client, read by the server.
    client_to_server: SharedRegion,
    /// Event the server blocks on; the client signals it.
    server_event: Arc<LocalEvent>,
    /// Event the client blocks on; the server signals it.
    client_event: Arc<LocalEvent>,
}

/// Shared state connecting the two in-process endpoints of one
/// broker/tenant pair.
///
/// Create one link, clone it, and hand one clone to each side's
/// `Transport::open`. Dropping the last clone frees the segments.
#[derive(Clone)]
pub struct MemoryLink {
    inner: Arc<LinkInner>,
}

impl MemoryLink {
    /// Create a link between a server zone and a client zone.
    #[must_use]
    pub fn new(server: ZoneId, client: ZoneId) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                server,
                client,
                server_to_client: SharedRegion::zeroed(RING_BYTES),
                client_to_server: SharedRegion::zeroed(RING_BYTES),
                server_event: Arc::new(LocalEvent::new()),
                client_event: Arc::new(LocalEvent::new()),
            }),
        }
    }

    /// Server-side zone of this link.
    #[must_use]
    pub fn server_zone(&self) -> ZoneId {
        self.inner.server
    }

    /// Client-side zone of this link.
    #[must_use]
    pub fn client_zone(&self) -> ZoneId {
        self.inner.client
    }

    pub(crate) fn server_to_client(&self) -> NonNull<u8> {
        self.inner.server_to_client.base()
    }

    pub(crate) fn client_to_server(&self) -> NonNull<u8> {
        self.inner.client_to_server.base()
    }

    pub(crate) fn server_event(&self) -> Arc<LocalEvent> {
        Arc::clone(&self.inner.server_event)
    }

    pub(crate) fn client_event(&self) -> Arc<LocalEvent> {
        Arc::clone(&self.inner.client_event)
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("server", &self.inner.server)
            .field("client", &self.inner.client)
            .finish()
    }
}

//! The IDM connection: paired rings plus a notifier.
//!
//! A `Transport` is one endpoint of a broker/tenant pair. It owns a tx
//! ring (local → remote), an rx ring (remote → local), the notifier it
//! blocks on, and the per-sender sequence counter used to stamp
//! outgoing frames.

use gpumux_proto::{Frame, MessageHeader, Payload, SequenceAllocator, ZoneId};

use crate::error::TransportError;
use crate::memory::MemoryLink;
use crate::notify::{Notifier, WaitOutcome};
use crate::ring::{RING_BYTES, RingView, SLOT_SIZE};
use crate::shm::ShmSegment;

/// Which side of the trust boundary this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Trusted broker side; initializes ring counters at open.
    Server,
    /// Tenant side; attaches to rings the server initialized.
    Client,
}

/// Transport backend selection, fixed at construction.
#[derive(Debug, Clone)]
pub enum Backend {
    /// POSIX shared memory + named semaphores, keyed by zone ids.
    Shm,
    /// In-process segments shared through a [`MemoryLink`].
    Memory(MemoryLink),
}

/// Live backend resources; dropped on close in declaration order
/// (views before mappings).
struct Endpoints {
    tx: RingView,
    rx: RingView,
    /// Signalled after every send; wakes the remote endpoint.
    signal_peer: Notifier,
    /// Waited on by `recv`; signalled by the remote endpoint.
    wait_local: Notifier,
    /// Keeps shm mappings or the memory link alive for the views.
    _resources: Resources,
}

enum Resources {
    Memory(MemoryLink),
    Shm { _tx_segment: ShmSegment, _rx_segment: ShmSegment },
}

/// One endpoint of an IDM connection.
pub struct Transport {
    endpoints: Option<Endpoints>,
    local: ZoneId,
    remote: ZoneId,
    role: Role,
    seq: SequenceAllocator,
}

impl Transport {
    /// Open the transport between `local` and `remote`.
    ///
    /// The server role zeroes both rings' counters; the client role
    /// attaches without touching them, so open order between the two
    /// sides only matters insofar as frames sent before the server
    /// opens are discarded by its reset.
    ///
    /// # Errors
    ///
    /// [`TransportError::Init`] on OS-level failures or a zone pair
    /// that does not match the supplied memory link.
    pub fn open(
        backend: Backend,
        local: ZoneId,
        remote: ZoneId,
        role: Role,
    ) -> Result<Self, TransportError> {
        let endpoints = match backend {
            Backend::Memory(link) => Self::open_memory(&link, local, remote, role)?,
            Backend::Shm => Self::open_shm(local, remote, role)?,
        };

        if matches!(role, Role::Server) {
            endpoints.tx.reset();
            endpoints.rx.reset();
        }

        tracing::debug!(%local, %remote, ?role, "transport open");

        Ok(Self { endpoints: Some(endpoints), local, remote, role, seq: SequenceAllocator::new() })
    }

    fn open_memory(
        link: &MemoryLink,
        local: ZoneId,
        remote: ZoneId,
        role: Role,
    ) -> Result<Endpoints, TransportError> {
        let (expected_local, expected_remote) = match role {
            Role::Server => (link.server_zone(), link.client_zone()),
            Role::Client => (link.client_zone(), link.server_zone()),
        };
        if (local, remote) != (expected_local, expected_remote) {
            return Err(TransportError::Init(format!(
                "zone pair ({local}, {remote}) does not match link ({}, {})",
                link.server_zone(),
                link.client_zone()
            )));
        }

        // SAFETY: the link's regions are RING_BYTES long, 64-byte
        // aligned, and live as long as the Resources below; each
        // region gets one producer (tx side) and one consumer (rx
        // side) across the two endpoints.
        let (tx, rx, signal_peer, wait_local) = unsafe {
            match role {
                Role::Server => (
                    RingView::new(link.server_to_client()),
                    RingView::new(link.client_to_server()),
                    Notifier::Local(link.client_event()),
                    Notifier::Local(link.server_event()),
                ),
                Role::Client => (
                    RingView::new(link.client_to_server()),
                    RingView::new(link.server_to_client()),
                    Notifier::Local(link.server_event()),
                    Notifier::Local(link.client_event()),
                ),
            }
        };

        Ok(Endpoints { tx, rx, signal_peer, wait_local, _resources: Resources::Memory(link.clone()) })
    }

    fn open_shm(local: ZoneId, remote: ZoneId, role: Role) -> Result<Endpoints, TransportError> {
        let server_cleans = matches!(role, Role::Server);

        let tx_name = format!("/gpumux-ring-{}-{}", local.get(), remote.get());
        let rx_name = format!("/gpumux-ring-{}-{}", remote.get(), local.get());
        let tx_segment = ShmSegment::open(&tx_name, RING_BYTES, server_cleans)?;
        let rx_segment = ShmSegment::open(&rx_name, RING_BYTES, server_cleans)?;

        let signal_peer =
            Notifier::Sem(crate::notify::SemEvent::open(&format!("/gpumux-evt-{}", remote.get()), server_cleans)?);
        let wait_local =
            Notifier::Sem(crate::notify::SemEvent::open(&format!("/gpumux-evt-{}", local.get()), server_cleans)?);

        // SAFETY: each segment is RING_BYTES long and page-aligned;
        // the segments live in Resources alongside the views. The
        // naming scheme gives each region exactly one producer (the
        // zone named first) and one consumer.
        let (tx, rx) = unsafe { (RingView::new(tx_segment.base()), RingView::new(rx_segment.base())) };

        Ok(Endpoints {
            tx,
            rx,
            signal_peer,
            wait_local,
            _resources: Resources::Shm { _tx_segment: tx_segment, _rx_segment: rx_segment },
        })
    }

    /// Local zone of this endpoint.
    #[must_use]
    pub fn local_zone(&self) -> ZoneId {
        self.local
    }

    /// Remote zone of this endpoint.
    #[must_use]
    pub fn remote_zone(&self) -> ZoneId {
        self.remote
    }

    /// Role this endpoint was opened with.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Build a frame addressed to the remote zone.
    ///
    /// Stamps the header with this endpoint's zone as source, the
    /// remote zone as destination, and the next sequence number. The
    /// caller must not mutate the frame after `send`.
    pub fn build(&mut self, payload: Payload) -> Frame {
        let mut header = MessageHeader::new(payload.kind());
        header.set_src_zone(self.local);
        header.set_dst_zone(self.remote);
        header.set_seq_num(self.seq.next());
        payload.into_frame(header)
    }

    /// Sequence number most recently handed out by [`Self::build`].
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.seq.peek() - 1
    }

    /// Publish one frame into the tx ring and signal the peer.
    ///
    /// Never blocks: a full ring is reported as
    /// [`TransportError::RingFull`] with the ring unchanged.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotConnected`] after close
    /// - [`TransportError::InvalidFrame`] if the frame fails its own
    ///   framing validation (magic, version, payload length)
    /// - [`TransportError::RingFull`]
    pub fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let endpoints = self.endpoints.as_ref().ok_or(TransportError::NotConnected)?;

        // Re-validate the header exactly as a receiver would; a frame
        // that would be dropped remotely is rejected here instead.
        let header_bytes = frame.header.to_bytes();
        MessageHeader::from_bytes(&header_bytes)?;
        if frame.payload.len() != frame.header.payload_len() as usize {
            return Err(TransportError::InvalidFrame(
                gpumux_proto::ProtocolError::FrameTruncated {
                    expected: frame.header.payload_len() as usize,
                    actual: frame.payload.len(),
                },
            ));
        }

        let mut slot = [0u8; SLOT_SIZE];
        let mut cursor = &mut slot[..];
        frame.encode(&mut cursor)?;

        if !endpoints.tx.try_push(&slot[..frame.encoded_len()]) {
            return Err(TransportError::RingFull);
        }
        endpoints.signal_peer.signal();
        Ok(())
    }

    /// Publish raw bytes into the tx ring without framing validation.
    ///
    /// This is the hostile-producer path used by chaos and security
    /// tests: it lets a test place arbitrary garbage on the ring the
    /// way a compromised tenant could. Production callers use
    /// [`Self::send`].
    pub fn inject_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let endpoints = self.endpoints.as_ref().ok_or(TransportError::NotConnected)?;

        let len = bytes.len().min(SLOT_SIZE);
        if !endpoints.tx.try_push(&bytes[..len]) {
            return Err(TransportError::RingFull);
        }
        endpoints.signal_peer.signal();
        Ok(())
    }

    /// Dequeue one frame from the rx ring.
    ///
    /// `timeout_ms` < 0 waits forever, 0 polls without blocking. A
    /// wake-up that finds the ring empty (spurious or stale) reports
    /// [`TransportError::TimedOut`]. A slot that fails framing
    /// validation reports [`TransportError::InvalidFrame`] with the
    /// consumer already advanced past it.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotConnected`] after close
    /// - [`TransportError::TimedOut`]
    /// - [`TransportError::InvalidFrame`]
    pub fn recv(&mut self, timeout_ms: i32) -> Result<Frame, TransportError> {
        let endpoints = self.endpoints.as_ref().ok_or(TransportError::NotConnected)?;

        let mut slot = [0u8; SLOT_SIZE];
        if !endpoints.rx.try_pop(&mut slot) {
            match endpoints.wait_local.wait(timeout_ms) {
                WaitOutcome::TimedOut => return Err(TransportError::TimedOut),
                WaitOutcome::Signaled => {
                    if !endpoints.rx.try_pop(&mut slot) {
                        // Signalled but empty: spurious wake-up.
                        return Err(TransportError::TimedOut);
                    }
                },
            }
        }

        // The consumer counter has already advanced; a malformed slot
        // is reported but never stalls the ring.
        let frame = Frame::decode(&slot)?;
        Ok(frame)
    }

    /// Release backend resources. Subsequent operations return
    /// [`TransportError::NotConnected`]. Frames still queued in either
    /// ring are discarded.
    pub fn close(&mut self) {
        if self.endpoints.take().is_some() {
            tracing::debug!(local = %self.local, remote = %self.remote, "transport closed");
        }
    }

    /// Whether the transport is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.endpoints.is_some()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("open", &self.is_open())
            .finish()
    }
}

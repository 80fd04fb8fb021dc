//! Transport error types.

use gpumux_proto::ProtocolError;
use thiserror::Error;

/// Errors raised by the ring transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// OS or hypervisor-level failure while opening the transport.
    ///
    /// Fatal for the connection: the shared segments or the notifier
    /// could not be created or mapped.
    #[error("transport init failed: {0}")]
    Init(String),

    /// The tx ring is full; the frame was not enqueued.
    ///
    /// The ring state is unchanged. Callers may retry after the peer
    /// drains, or propagate as fatal.
    #[error("ring full")]
    RingFull,

    /// No frame arrived within the wait budget.
    ///
    /// Also returned when the notifier fired but the ring turned out
    /// empty (a spurious wake-up).
    #[error("receive timed out")]
    TimedOut,

    /// The dequeued slot did not contain a valid frame.
    ///
    /// The consumer counter has already advanced past the bad slot, so
    /// a malformed producer cannot stall the ring.
    #[error("invalid frame on ring: {0}")]
    InvalidFrame(#[from] ProtocolError),

    /// The transport has been closed; no further operations possible.
    #[error("not connected")]
    NotConnected,
}

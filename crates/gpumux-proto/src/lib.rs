//! IDM wire protocol for the gpumux GPU virtualization broker.
//!
//! IDM (inter-domain messaging) is the framed request/response protocol
//! spoken between tenant zones and the trusted broker zone over paired
//! shared-memory rings. This crate defines the bit-exact wire format:
//! the fixed 32-byte header, the closed set of message kinds, the typed
//! request/response payloads, and the error taxonomy carried in ERROR
//! frames.
//!
//! Frame headers and payload structs are raw binary (little-endian,
//! packed) parsed with `zerocopy` so the broker can validate and route a
//! frame without copying it. Inline bulk data (host-to-device writes,
//! device-to-host reads, error messages) follows its payload struct as
//! raw bytes.
//!
//! Nothing in this crate touches a ring or a device: transport lives in
//! `gpumux-transport`, dispatch in `gpumux-broker`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;
mod header;
mod kind;
mod payloads;
mod seq;

pub use errors::{ErrorKind, ProtocolError, Result};
pub use frame::Frame;
pub use header::MessageHeader;
pub use kind::MessageKind;
pub use payloads::{
    AllocRequest, CopyFromDeviceRequest, CopyOnDeviceRequest, CopyToDeviceRequest, ErrorResponse,
    FreeRequest, InfoRequest, InfoSelector, MemsetRequest, OkResponse, Payload, SyncRequest,
};
pub use seq::SequenceAllocator;

/// A trust boundary identifier.
///
/// One zone is the trusted broker zone; the rest are tenant zones. Zone
/// ids are assigned out-of-band (by the hypervisor toolstack in
/// production, by the operator in development) and are opaque to the
/// protocol beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub u32);

impl ZoneId {
    /// Raw zone number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "zone{}", self.0)
    }
}

impl From<u32> for ZoneId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

//! Frame header with zero-copy parsing.
//!
//! The `MessageHeader` is a fixed 32-byte structure serialized as raw
//! binary (little-endian, packed). The broker validates and routes a
//! frame from the header alone; payload parsing happens later and only
//! for frames that passed header validation.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MessageKind, ZoneId,
    errors::{ProtocolError, Result},
};

/// Fixed 32-byte frame header (little-endian wire order).
///
/// Fields are stored as raw byte arrays to avoid alignment issues; all
/// multi-byte integers are little-endian. The `#[repr(C, packed)]`
/// layout with zerocopy traits lets the header be cast directly from
/// untrusted ring bytes: every 32-byte pattern is a valid bit pattern,
/// so the cast itself can never be undefined behavior. Validity (magic,
/// version, payload length) is checked explicitly in
/// [`MessageHeader::from_bytes`].
///
/// # Invariants
///
/// - `magic` is always `"IDM\0"` on any header produced by this crate.
/// - `payload_len` never exceeds [`MessageHeader::MAX_PAYLOAD_SIZE`] on
///   any header accepted by [`MessageHeader::from_bytes`].
/// - `reserved` is zero on send and ignored on receive.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],
    version: [u8; 2],
    pub(crate) kind: [u8; 2],

    // Routing (8 bytes: 8-15)
    src_zone: [u8; 4],
    dst_zone: [u8; 4],

    // Correlation and payload metadata (16 bytes: 16-31)
    seq_num: [u8; 8],
    pub(crate) payload_len: [u8; 4],
    reserved: [u8; 4],
}

impl MessageHeader {
    /// Size of the serialized header (32 bytes).
    pub const SIZE: usize = 32;

    /// Magic number: `"IDM\0"` in ASCII, read as a little-endian u32.
    pub const MAGIC: u32 = u32::from_le_bytes(*b"IDM\0");

    /// Current protocol version, packed `(major << 8) | minor`.
    pub const VERSION: u16 = (1 << 8) | 0;

    /// Maximum payload size: one 4096-byte ring slot minus this header.
    pub const MAX_PAYLOAD_SIZE: u32 = 4096 - Self::SIZE as u32;

    /// Create a header for the given kind with all routing fields zero.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            magic: Self::MAGIC.to_le_bytes(),
            version: Self::VERSION.to_le_bytes(),
            kind: kind.to_u16().to_le_bytes(),
            src_zone: [0; 4],
            dst_zone: [0; 4],
            seq_num: [0; 8],
            payload_len: [0; 4],
            reserved: [0; 4],
        }
    }

    /// Parse a header from ring bytes (zero-copy).
    ///
    /// Casts the prefix of `bytes` to a `MessageHeader` reference and
    /// validates the cheap properties first (size, magic) before the
    /// rest (version, payload length). The `reserved` field is ignored
    /// on receive.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than 32 bytes
    /// - [`ProtocolError::InvalidMagic`] if the magic does not match
    /// - [`ProtocolError::UnsupportedVersion`] on a version mismatch
    /// - [`ProtocolError::PayloadTooLarge`] if `payload_len` exceeds the
    ///   per-slot capacity
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_le_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if u16::from_le_bytes(header.version) != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(u16::from_le_bytes(header.version)));
        }

        let payload_len = u32::from_le_bytes(header.payload_len);
        if payload_len > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to its 32 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol magic constant.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    /// Packed protocol version.
    #[must_use]
    pub fn version(&self) -> u16 {
        u16::from_le_bytes(self.version)
    }

    /// Kind code as raw u16.
    #[must_use]
    pub fn kind_raw(&self) -> u16 {
        u16::from_le_bytes(self.kind)
    }

    /// Kind code as enum. `None` if unrecognized.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_u16(self.kind_raw())
    }

    /// Zone that sent this frame.
    #[must_use]
    pub fn src_zone(&self) -> ZoneId {
        ZoneId(u32::from_le_bytes(self.src_zone))
    }

    /// Zone this frame is addressed to.
    #[must_use]
    pub fn dst_zone(&self) -> ZoneId {
        ZoneId(u32::from_le_bytes(self.dst_zone))
    }

    /// Per-sender monotonic sequence number.
    ///
    /// The sole correlation identifier between a request and its
    /// response: an OK/ERROR payload echoes the request's value in its
    /// `request_seq` field.
    #[must_use]
    pub fn seq_num(&self) -> u64 {
        u64::from_le_bytes(self.seq_num)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        u32::from_le_bytes(self.payload_len)
    }

    /// Update the kind code.
    pub fn set_kind(&mut self, kind: MessageKind) {
        self.kind = kind.to_u16().to_le_bytes();
    }

    /// Update the source zone.
    pub fn set_src_zone(&mut self, zone: ZoneId) {
        self.src_zone = zone.0.to_le_bytes();
    }

    /// Update the destination zone.
    pub fn set_dst_zone(&mut self, zone: ZoneId) {
        self.dst_zone = zone.0.to_le_bytes();
    }

    /// Assign the sequence number.
    pub fn set_seq_num(&mut self, seq: u64) {
        self.seq_num = seq.to_le_bytes();
    }

    /// Set the payload length (normally done by `Frame::new`).
    pub fn set_payload_len(&mut self, len: u32) {
        self.payload_len = len.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &format!("{:#06x}", self.version()))
            .field("kind", &format!("{:#06x}", self.kind_raw()))
            .field("src_zone", &self.src_zone())
            .field("dst_zone", &self.dst_zone())
            .field("seq_num", &self.seq_num())
            .field("payload_len", &self.payload_len())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for MessageHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for MessageHeader {}

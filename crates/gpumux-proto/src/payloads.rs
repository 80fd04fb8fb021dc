//! Typed request/response payloads.
//!
//! Frame payloads are raw binary structs (little-endian, packed), laid
//! out as `struct fields || raw bytes` for the kinds that carry inline
//! data (COPY_H2D requests, OK responses, ERROR messages). The
//! [`Payload`] enum is the tagged union over all of them, keyed by the
//! kind code in the frame header.
//!
//! # Invariants
//!
//! - Each payload variant maps to exactly one [`MessageKind`] (enforced
//!   by match exhaustiveness in `kind()`, `encode()`, `decode()`).
//! - No variant tag is serialized: the header's kind field already
//!   identifies the payload type, so an attacker cannot send a
//!   mismatched kind/payload pair.
//! - Round-trip encoding produces identical values.

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    ErrorKind, Frame, MessageHeader, MessageKind,
    errors::{ProtocolError, Result},
};

/// Cast the payload prefix to a typed struct, returning the remainder
/// as inline bytes.
fn split_payload<'a, T>(kind: &'static str, bytes: &'a [u8]) -> Result<(&'a T, &'a [u8])>
where
    T: FromBytes + KnownLayout + Immutable,
{
    T::ref_from_prefix(bytes).map_err(|_| ProtocolError::PayloadMismatch {
        kind,
        detail: format!(
            "need {} struct bytes, got {}",
            std::mem::size_of::<T>(),
            bytes.len()
        ),
    })
}

/// Reject trailing bytes after a fixed-size payload struct.
fn reject_trailing(kind: &'static str, rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::PayloadMismatch {
            kind,
            detail: format!("{} unexpected trailing bytes", rest.len()),
        })
    }
}

/// ALLOC request: reserve `size` bytes of device memory.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AllocRequest {
    size: [u8; 8],
    flags: [u8; 8],
}

impl AllocRequest {
    /// Serialized size (16 bytes).
    pub const SIZE: usize = 16;

    /// Build a request for `size` bytes with allocation `flags`.
    #[must_use]
    pub fn new(size: u64, flags: u64) -> Self {
        Self { size: size.to_le_bytes(), flags: flags.to_le_bytes() }
    }

    /// Requested allocation size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from_le_bytes(self.size)
    }

    /// Allocation flags (passed through to the driver).
    #[must_use]
    pub fn flags(&self) -> u64 {
        u64::from_le_bytes(self.flags)
    }
}

/// FREE request: release the allocation behind `handle`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FreeRequest {
    handle: [u8; 8],
}

impl FreeRequest {
    /// Serialized size (8 bytes).
    pub const SIZE: usize = 8;

    /// Build a request to free `handle`.
    #[must_use]
    pub fn new(handle: u64) -> Self {
        Self { handle: handle.to_le_bytes() }
    }

    /// Handle to release.
    #[must_use]
    pub fn handle(&self) -> u64 {
        u64::from_le_bytes(self.handle)
    }
}

/// COPY_H2D request: write the inline bytes that follow this struct
/// into `[dst_offset, dst_offset + size)` of the destination handle.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CopyToDeviceRequest {
    dst_handle: [u8; 8],
    dst_offset: [u8; 8],
    size: [u8; 8],
}

impl CopyToDeviceRequest {
    /// Serialized size (24 bytes), excluding inline data.
    pub const SIZE: usize = 24;

    /// Build a write of `size` bytes at `dst_offset` into `dst_handle`.
    #[must_use]
    pub fn new(dst_handle: u64, dst_offset: u64, size: u64) -> Self {
        Self {
            dst_handle: dst_handle.to_le_bytes(),
            dst_offset: dst_offset.to_le_bytes(),
            size: size.to_le_bytes(),
        }
    }

    /// Destination handle.
    #[must_use]
    pub fn dst_handle(&self) -> u64 {
        u64::from_le_bytes(self.dst_handle)
    }

    /// Byte offset into the destination allocation.
    #[must_use]
    pub fn dst_offset(&self) -> u64 {
        u64::from_le_bytes(self.dst_offset)
    }

    /// Transfer size in bytes; must equal the inline data length.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from_le_bytes(self.size)
    }
}

/// COPY_D2H request: read `[src_offset, src_offset + size)` from the
/// source handle. The OK response carries the bytes inline.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CopyFromDeviceRequest {
    src_handle: [u8; 8],
    src_offset: [u8; 8],
    size: [u8; 8],
}

impl CopyFromDeviceRequest {
    /// Serialized size (24 bytes).
    pub const SIZE: usize = 24;

    /// Build a read of `size` bytes at `src_offset` from `src_handle`.
    #[must_use]
    pub fn new(src_handle: u64, src_offset: u64, size: u64) -> Self {
        Self {
            src_handle: src_handle.to_le_bytes(),
            src_offset: src_offset.to_le_bytes(),
            size: size.to_le_bytes(),
        }
    }

    /// Source handle.
    #[must_use]
    pub fn src_handle(&self) -> u64 {
        u64::from_le_bytes(self.src_handle)
    }

    /// Byte offset into the source allocation.
    #[must_use]
    pub fn src_offset(&self) -> u64 {
        u64::from_le_bytes(self.src_offset)
    }

    /// Transfer size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from_le_bytes(self.size)
    }
}

/// COPY_D2D request: copy between two allocations owned by the
/// requesting zone.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CopyOnDeviceRequest {
    dst_handle: [u8; 8],
    dst_offset: [u8; 8],
    src_handle: [u8; 8],
    src_offset: [u8; 8],
    size: [u8; 8],
}

impl CopyOnDeviceRequest {
    /// Serialized size (40 bytes).
    pub const SIZE: usize = 40;

    /// Build a device-to-device copy of `size` bytes.
    #[must_use]
    pub fn new(dst_handle: u64, dst_offset: u64, src_handle: u64, src_offset: u64, size: u64) -> Self {
        Self {
            dst_handle: dst_handle.to_le_bytes(),
            dst_offset: dst_offset.to_le_bytes(),
            src_handle: src_handle.to_le_bytes(),
            src_offset: src_offset.to_le_bytes(),
            size: size.to_le_bytes(),
        }
    }

    /// Destination handle.
    #[must_use]
    pub fn dst_handle(&self) -> u64 {
        u64::from_le_bytes(self.dst_handle)
    }

    /// Byte offset into the destination allocation.
    #[must_use]
    pub fn dst_offset(&self) -> u64 {
        u64::from_le_bytes(self.dst_offset)
    }

    /// Source handle.
    #[must_use]
    pub fn src_handle(&self) -> u64 {
        u64::from_le_bytes(self.src_handle)
    }

    /// Byte offset into the source allocation.
    #[must_use]
    pub fn src_offset(&self) -> u64 {
        u64::from_le_bytes(self.src_offset)
    }

    /// Copy size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from_le_bytes(self.size)
    }
}

/// MEMSET request: fill `[offset, offset + size)` of the allocation
/// with the byte in the low 8 bits of `value`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MemsetRequest {
    handle: [u8; 8],
    offset: [u8; 8],
    size: [u8; 8],
    value: [u8; 4],
    reserved: [u8; 4],
}

impl MemsetRequest {
    /// Serialized size (32 bytes).
    pub const SIZE: usize = 32;

    /// Build a fill of `size` bytes of `value` at `offset`.
    #[must_use]
    pub fn new(handle: u64, offset: u64, value: u8, size: u64) -> Self {
        Self {
            handle: handle.to_le_bytes(),
            offset: offset.to_le_bytes(),
            size: size.to_le_bytes(),
            value: u32::from(value).to_le_bytes(),
            reserved: [0; 4],
        }
    }

    /// Target handle.
    #[must_use]
    pub fn handle(&self) -> u64 {
        u64::from_le_bytes(self.handle)
    }

    /// Byte offset into the allocation.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from_le_bytes(self.offset)
    }

    /// Fill size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from_le_bytes(self.size)
    }

    /// Fill byte (low 8 bits of the wire field).
    #[must_use]
    pub fn value(&self) -> u8 {
        (u32::from_le_bytes(self.value) & 0xFF) as u8
    }
}

/// SYNC request: device-wide synchronization barrier.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SyncRequest {
    flags: [u8; 8],
}

impl SyncRequest {
    /// Serialized size (8 bytes).
    pub const SIZE: usize = 8;

    /// Build a sync request with `flags`.
    #[must_use]
    pub fn new(flags: u64) -> Self {
        Self { flags: flags.to_le_bytes() }
    }

    /// Synchronization flags (passed through to the driver).
    #[must_use]
    pub fn flags(&self) -> u64 {
        u64::from_le_bytes(self.flags)
    }
}

/// GET_INFO request: query broker-chosen device metadata.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct InfoRequest {
    selector: [u8; 4],
    reserved: [u8; 4],
}

impl InfoRequest {
    /// Serialized size (8 bytes).
    pub const SIZE: usize = 8;

    /// Build an info query for `selector`.
    #[must_use]
    pub fn new(selector: InfoSelector) -> Self {
        Self { selector: selector.to_u32().to_le_bytes(), reserved: [0; 4] }
    }

    /// Raw selector code.
    #[must_use]
    pub fn selector_raw(&self) -> u32 {
        u32::from_le_bytes(self.selector)
    }

    /// Selector as enum. `None` if unrecognized.
    #[must_use]
    pub fn selector(&self) -> Option<InfoSelector> {
        InfoSelector::from_u32(self.selector_raw())
    }
}

/// Device metadata selectors for GET_INFO.
///
/// Values are broker-chosen and never expose trusted-zone addresses;
/// tenants see a virtual device, not the physical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InfoSelector {
    /// Number of devices visible to the tenant (always 1).
    DeviceCount = 0,
    /// Virtual device name, returned as inline UTF-8 bytes.
    DeviceName = 1,
    /// Total device memory in bytes.
    TotalMemory = 2,
    /// Currently free device memory in bytes.
    FreeMemory = 3,
    /// Broker API version, packed `(major << 8) | minor`.
    ApiVersion = 4,
}

impl InfoSelector {
    /// Wire code for this selector.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire code. `None` if unrecognized.
    #[must_use]
    pub const fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::DeviceCount),
            1 => Some(Self::DeviceName),
            2 => Some(Self::TotalMemory),
            3 => Some(Self::FreeMemory),
            4 => Some(Self::ApiVersion),
            _ => None,
        }
    }
}

/// OK response: the request identified by `request_seq` succeeded.
///
/// `result_handle` is nonzero only for ALLOC responses. `result_value`
/// carries scalar GET_INFO answers. Inline data (COPY_D2H reads,
/// device-name strings) follows the struct; `data_len` counts it.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct OkResponse {
    request_seq: [u8; 8],
    result_handle: [u8; 8],
    result_value: [u8; 8],
    data_len: [u8; 4],
    reserved: [u8; 4],
}

impl OkResponse {
    /// Serialized size (32 bytes), excluding inline data.
    pub const SIZE: usize = 32;

    /// Build an OK response echoing `request_seq`.
    #[must_use]
    pub fn new(request_seq: u64, result_handle: u64, result_value: u64, data_len: u32) -> Self {
        Self {
            request_seq: request_seq.to_le_bytes(),
            result_handle: result_handle.to_le_bytes(),
            result_value: result_value.to_le_bytes(),
            data_len: data_len.to_le_bytes(),
            reserved: [0; 4],
        }
    }

    /// Sequence number of the request this answers.
    #[must_use]
    pub fn request_seq(&self) -> u64 {
        u64::from_le_bytes(self.request_seq)
    }

    /// Result handle (nonzero only for ALLOC).
    #[must_use]
    pub fn result_handle(&self) -> u64 {
        u64::from_le_bytes(self.result_handle)
    }

    /// Scalar result (GET_INFO answers).
    #[must_use]
    pub fn result_value(&self) -> u64 {
        u64::from_le_bytes(self.result_value)
    }

    /// Length of the inline data following this struct.
    #[must_use]
    pub fn data_len(&self) -> u32 {
        u32::from_le_bytes(self.data_len)
    }
}

/// ERROR response: the request identified by `request_seq` failed.
///
/// `code` is an [`ErrorKind`] wire code; `driver_code` is the
/// underlying driver's native error (zero when no driver call was
/// involved). A short human-readable message follows inline.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ErrorResponse {
    request_seq: [u8; 8],
    code: [u8; 4],
    driver_code: [u8; 4],
    message_len: [u8; 4],
    reserved: [u8; 4],
}

impl ErrorResponse {
    /// Serialized size (24 bytes), excluding the inline message.
    pub const SIZE: usize = 24;

    /// Build an ERROR response echoing `request_seq`.
    #[must_use]
    pub fn new(request_seq: u64, kind: ErrorKind, driver_code: i32, message_len: u32) -> Self {
        Self {
            request_seq: request_seq.to_le_bytes(),
            code: kind.to_u32().to_le_bytes(),
            driver_code: driver_code.to_le_bytes(),
            message_len: message_len.to_le_bytes(),
            reserved: [0; 4],
        }
    }

    /// Sequence number of the request this answers.
    #[must_use]
    pub fn request_seq(&self) -> u64 {
        u64::from_le_bytes(self.request_seq)
    }

    /// Error kind (unrecognized codes decode as `Unknown`).
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_u32(u32::from_le_bytes(self.code))
    }

    /// Native driver error code, zero if none.
    #[must_use]
    pub fn driver_code(&self) -> i32 {
        i32::from_le_bytes(self.driver_code)
    }

    /// Length of the inline message following this struct.
    #[must_use]
    pub fn message_len(&self) -> u32 {
        u32::from_le_bytes(self.message_len)
    }
}

/// All possible frame payloads.
///
/// Variants with inline data carry it alongside the wire struct; the
/// struct's length field and the attached bytes are kept consistent by
/// the constructors below and verified on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Allocate device memory.
    Alloc(AllocRequest),
    /// Release device memory.
    Free(FreeRequest),
    /// Host-to-device write with inline source bytes.
    CopyToDevice(CopyToDeviceRequest, Bytes),
    /// Device-to-host read.
    CopyFromDevice(CopyFromDeviceRequest),
    /// Device-to-device copy.
    CopyOnDevice(CopyOnDeviceRequest),
    /// Device memory fill.
    Memset(MemsetRequest),
    /// Device-wide synchronization.
    Sync(SyncRequest),
    /// Device metadata query.
    Info(InfoRequest),
    /// Success response with optional inline data.
    Ok(OkResponse, Bytes),
    /// Failure response with a short message.
    Error(ErrorResponse, String),
}

impl Payload {
    /// Build a consistent OK response payload.
    ///
    /// Sets `data_len` from the attached bytes so the struct and the
    /// inline data cannot disagree.
    #[must_use]
    pub fn ok(request_seq: u64, result_handle: u64, result_value: u64, data: Bytes) -> Self {
        let data_len = data.len() as u32;
        Self::Ok(OkResponse::new(request_seq, result_handle, result_value, data_len), data)
    }

    /// Build a consistent ERROR response payload.
    ///
    /// The message is truncated to 256 bytes; ERROR frames must always
    /// fit a ring slot.
    #[must_use]
    pub fn error(request_seq: u64, kind: ErrorKind, driver_code: i32, message: &str) -> Self {
        let mut message = message.to_string();
        if message.len() > 256 {
            // Back off to a char boundary so the cut cannot panic.
            let mut cut = 256;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        let resp = ErrorResponse::new(request_seq, kind, driver_code, message.len() as u32);
        Self::Error(resp, message)
    }

    /// Message kind corresponding to this payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Alloc(_) => MessageKind::Alloc,
            Self::Free(_) => MessageKind::Free,
            Self::CopyToDevice(..) => MessageKind::CopyToDevice,
            Self::CopyFromDevice(_) => MessageKind::CopyFromDevice,
            Self::CopyOnDevice(_) => MessageKind::CopyOnDevice,
            Self::Memset(_) => MessageKind::Memset,
            Self::Sync(_) => MessageKind::Sync,
            Self::Info(_) => MessageKind::Info,
            Self::Ok(..) => MessageKind::Ok,
            Self::Error(..) => MessageKind::Error,
        }
    }

    /// Encode the payload into a buffer as `struct || inline bytes`.
    ///
    /// No variant tag is written; the frame header's kind field
    /// identifies the payload type.
    pub fn encode(&self, dst: &mut impl BufMut) {
        match self {
            Self::Alloc(req) => dst.put_slice(req.as_bytes()),
            Self::Free(req) => dst.put_slice(req.as_bytes()),
            Self::CopyToDevice(req, data) => {
                dst.put_slice(req.as_bytes());
                dst.put_slice(data);
            },
            Self::CopyFromDevice(req) => dst.put_slice(req.as_bytes()),
            Self::CopyOnDevice(req) => dst.put_slice(req.as_bytes()),
            Self::Memset(req) => dst.put_slice(req.as_bytes()),
            Self::Sync(req) => dst.put_slice(req.as_bytes()),
            Self::Info(req) => dst.put_slice(req.as_bytes()),
            Self::Ok(resp, data) => {
                debug_assert_eq!(resp.data_len() as usize, data.len());
                dst.put_slice(resp.as_bytes());
                dst.put_slice(data);
            },
            Self::Error(resp, message) => {
                debug_assert_eq!(resp.message_len() as usize, message.len());
                dst.put_slice(resp.as_bytes());
                dst.put_slice(message.as_bytes());
            },
        }
    }

    /// Decode payload bytes for a known kind.
    ///
    /// Fixed-size payloads reject trailing bytes. OK and ERROR payloads
    /// require their inline-length field to match the attached bytes
    /// exactly. COPY_H2D inline data is returned as-is; the dispatcher
    /// checks it against the request's `size` field so that the check
    /// order of the request pipeline (handle, bounds, inline length) is
    /// preserved.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::PayloadMismatch`] on any size inconsistency.
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Self> {
        match kind {
            MessageKind::Alloc => {
                let (req, rest) = split_payload::<AllocRequest>("ALLOC", bytes)?;
                reject_trailing("ALLOC", rest)?;
                Ok(Self::Alloc(*req))
            },
            MessageKind::Free => {
                let (req, rest) = split_payload::<FreeRequest>("FREE", bytes)?;
                reject_trailing("FREE", rest)?;
                Ok(Self::Free(*req))
            },
            MessageKind::CopyToDevice => {
                let (req, rest) = split_payload::<CopyToDeviceRequest>("COPY_H2D", bytes)?;
                Ok(Self::CopyToDevice(*req, Bytes::copy_from_slice(rest)))
            },
            MessageKind::CopyFromDevice => {
                let (req, rest) = split_payload::<CopyFromDeviceRequest>("COPY_D2H", bytes)?;
                reject_trailing("COPY_D2H", rest)?;
                Ok(Self::CopyFromDevice(*req))
            },
            MessageKind::CopyOnDevice => {
                let (req, rest) = split_payload::<CopyOnDeviceRequest>("COPY_D2D", bytes)?;
                reject_trailing("COPY_D2D", rest)?;
                Ok(Self::CopyOnDevice(*req))
            },
            MessageKind::Memset => {
                let (req, rest) = split_payload::<MemsetRequest>("MEMSET", bytes)?;
                reject_trailing("MEMSET", rest)?;
                Ok(Self::Memset(*req))
            },
            MessageKind::Sync => {
                let (req, rest) = split_payload::<SyncRequest>("SYNC", bytes)?;
                reject_trailing("SYNC", rest)?;
                Ok(Self::Sync(*req))
            },
            MessageKind::Info => {
                let (req, rest) = split_payload::<InfoRequest>("GET_INFO", bytes)?;
                reject_trailing("GET_INFO", rest)?;
                Ok(Self::Info(*req))
            },
            MessageKind::Ok => {
                let (resp, rest) = split_payload::<OkResponse>("OK", bytes)?;
                if resp.data_len() as usize != rest.len() {
                    return Err(ProtocolError::PayloadMismatch {
                        kind: "OK",
                        detail: format!(
                            "data_len {} != {} inline bytes",
                            resp.data_len(),
                            rest.len()
                        ),
                    });
                }
                Ok(Self::Ok(*resp, Bytes::copy_from_slice(rest)))
            },
            MessageKind::Error => {
                let (resp, rest) = split_payload::<ErrorResponse>("ERROR", bytes)?;
                if resp.message_len() as usize != rest.len() {
                    return Err(ProtocolError::PayloadMismatch {
                        kind: "ERROR",
                        detail: format!(
                            "message_len {} != {} inline bytes",
                            resp.message_len(),
                            rest.len()
                        ),
                    });
                }
                let message = String::from_utf8_lossy(rest).into_owned();
                Ok(Self::Error(*resp, message))
            },
        }
    }

    /// Convert this payload into a transport frame.
    ///
    /// Encodes the payload, stamps the kind into the header, and lets
    /// `Frame::new` compute `payload_len`.
    #[must_use]
    pub fn into_frame(self, mut header: MessageHeader) -> Frame {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        header.set_kind(self.kind());
        Frame::new(header, buf)
    }

    /// Parse the typed payload out of a raw transport frame.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownKind`] if the header kind is not in
    ///   the kind table
    /// - [`ProtocolError::PayloadMismatch`] on size inconsistencies
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let kind = frame
            .header
            .kind()
            .ok_or(ProtocolError::UnknownKind(frame.header.kind_raw()))?;
        Self::decode(kind, &frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(payload: Payload) -> Payload {
        let kind = payload.kind();
        let mut buf = Vec::new();
        payload.encode(&mut buf);
        Payload::decode(kind, &buf).expect("should decode")
    }

    #[test]
    fn alloc_round_trip() {
        let payload = Payload::Alloc(AllocRequest::new(4096, 0x2));
        assert_eq!(round_trip(payload.clone()), payload);
    }

    #[test]
    fn copy_to_device_carries_inline_bytes() {
        let data = Bytes::from_static(&[1, 2, 3, 4, 5]);
        let payload = Payload::CopyToDevice(CopyToDeviceRequest::new(7, 0, 5), data.clone());

        let decoded = round_trip(payload);
        match decoded {
            Payload::CopyToDevice(req, inline) => {
                assert_eq!(req.dst_handle(), 7);
                assert_eq!(req.size(), 5);
                assert_eq!(inline, data);
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn ok_inline_length_enforced() {
        // Struct claims 8 data bytes but only 3 follow.
        let resp = OkResponse::new(1, 0, 0, 8);
        let mut buf = Vec::new();
        buf.extend_from_slice(resp.as_bytes());
        buf.extend_from_slice(&[1, 2, 3]);

        let result = Payload::decode(MessageKind::Ok, &buf);
        assert!(matches!(result, Err(ProtocolError::PayloadMismatch { kind: "OK", .. })));
    }

    #[test]
    fn error_round_trip_preserves_message() {
        let payload = Payload::error(99, ErrorKind::InvalidHandle, -3, "no such handle");
        match round_trip(payload) {
            Payload::Error(resp, message) => {
                assert_eq!(resp.request_seq(), 99);
                assert_eq!(resp.kind(), ErrorKind::InvalidHandle);
                assert_eq!(resp.driver_code(), -3);
                assert_eq!(message, "no such handle");
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_message_truncated() {
        let long = "x".repeat(4000);
        let Payload::Error(resp, message) =
            Payload::error(1, ErrorKind::DeviceError, 0, &long)
        else {
            panic!("wrong variant");
        };
        assert_eq!(message.len(), 256);
        assert_eq!(resp.message_len(), 256);
    }

    #[test]
    fn fixed_payload_rejects_trailing_bytes() {
        let req = FreeRequest::new(5);
        let mut buf = Vec::new();
        buf.extend_from_slice(req.as_bytes());
        buf.push(0xAB);

        let result = Payload::decode(MessageKind::Free, &buf);
        assert!(matches!(result, Err(ProtocolError::PayloadMismatch { kind: "FREE", .. })));
    }

    #[test]
    fn short_struct_rejected() {
        let result = Payload::decode(MessageKind::Memset, &[0u8; 4]);
        assert!(matches!(result, Err(ProtocolError::PayloadMismatch { kind: "MEMSET", .. })));
    }

    #[test]
    fn struct_sizes_match_wire_layout() {
        assert_eq!(std::mem::size_of::<AllocRequest>(), AllocRequest::SIZE);
        assert_eq!(std::mem::size_of::<FreeRequest>(), FreeRequest::SIZE);
        assert_eq!(std::mem::size_of::<CopyToDeviceRequest>(), CopyToDeviceRequest::SIZE);
        assert_eq!(std::mem::size_of::<CopyFromDeviceRequest>(), CopyFromDeviceRequest::SIZE);
        assert_eq!(std::mem::size_of::<CopyOnDeviceRequest>(), CopyOnDeviceRequest::SIZE);
        assert_eq!(std::mem::size_of::<MemsetRequest>(), MemsetRequest::SIZE);
        assert_eq!(std::mem::size_of::<SyncRequest>(), SyncRequest::SIZE);
        assert_eq!(std::mem::size_of::<InfoRequest>(), InfoRequest::SIZE);
        assert_eq!(std::mem::size_of::<OkResponse>(), OkResponse::SIZE);
        assert_eq!(std::mem::size_of::<ErrorResponse>(), ErrorResponse::SIZE);
    }

    #[test]
    fn into_frame_stamps_kind_and_length() {
        let payload = Payload::Sync(SyncRequest::new(0));
        let frame = payload.clone().into_frame(MessageHeader::new(MessageKind::Alloc));

        assert_eq!(frame.header.kind(), Some(MessageKind::Sync));
        assert_eq!(frame.header.payload_len() as usize, SyncRequest::SIZE);
        assert_eq!(Payload::from_frame(&frame).expect("should parse"), payload);
    }
}

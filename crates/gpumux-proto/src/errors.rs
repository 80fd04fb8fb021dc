//! Protocol errors and the wire error taxonomy.
//!
//! Two distinct things live here. [`ProtocolError`] is the Rust-side
//! error for framing and parsing failures inside this crate.
//! [`ErrorKind`] is the closed set of wire codes carried in ERROR
//! response frames; it is part of the protocol contract and never
//! grows without a version bump.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or parsing IDM messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short to contain the expected structure.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum byte count required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Magic constant did not match `"IDM\0"`.
    #[error("invalid magic number")]
    InvalidMagic,

    /// Version field did not match this implementation's version.
    #[error("unsupported protocol version: {0:#06x}")]
    UnsupportedVersion(u16),

    /// Header claimed a payload larger than a ring slot can carry.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Claimed payload size.
        size: usize,
        /// Per-slot payload capacity.
        max: usize,
    },

    /// Buffer ended before the payload the header claimed.
    #[error("frame truncated: header claims {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload bytes the header claims.
        expected: usize,
        /// Payload bytes actually present.
        actual: usize,
    },

    /// Kind code not present in the kind table.
    #[error("unknown message kind: {0:#06x}")]
    UnknownKind(u16),

    /// Payload bytes inconsistent with the typed layout for this kind.
    #[error("payload mismatch for {kind}: {detail}")]
    PayloadMismatch {
        /// Kind name the payload was parsed as.
        kind: &'static str,
        /// What was inconsistent.
        detail: String,
    },
}

/// Wire error codes carried in ERROR response frames.
///
/// `None` is the success sentinel and never appears in an ERROR frame.
/// Unrecognized codes decode to [`ErrorKind::Unknown`] rather than
/// failing, so an older client can still surface an error from a newer
/// broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorKind {
    /// Success sentinel; not carried in ERROR frames.
    None = 0,
    /// Framing, version, or payload-length violation.
    InvalidFrame = 1,
    /// Handle absent, or present but not owned by the requester.
    InvalidHandle = 2,
    /// Reserved; ownership violations map to `InvalidHandle` instead.
    PermissionDenied = 3,
    /// Broker-local or device-side allocation failure.
    OutOfMemory = 4,
    /// Bounds or size-arithmetic violation.
    InvalidSize = 5,
    /// Transport-level wait exceeded.
    TimedOut = 6,
    /// Transport closed or unusable.
    ConnectionLost = 7,
    /// Underlying driver returned an error; its native code rides along.
    DeviceError = 8,
    /// Catch-all; implementations avoid emitting this.
    Unknown = 99,
}

impl ErrorKind {
    /// Wire code for this error kind.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    /// Decode a wire code. Unrecognized codes become `Unknown`.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::InvalidFrame,
            2 => Self::InvalidHandle,
            3 => Self::PermissionDenied,
            4 => Self::OutOfMemory,
            5 => Self::InvalidSize,
            6 => Self::TimedOut,
            7 => Self::ConnectionLost,
            8 => Self::DeviceError,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::InvalidFrame => "invalid frame",
            Self::InvalidHandle => "invalid handle",
            Self::PermissionDenied => "permission denied",
            Self::OutOfMemory => "out of memory",
            Self::InvalidSize => "invalid size",
            Self::TimedOut => "timed out",
            Self::ConnectionLost => "connection lost",
            Self::DeviceError => "device error",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_codes_round_trip() {
        let kinds = [
            ErrorKind::None,
            ErrorKind::InvalidFrame,
            ErrorKind::InvalidHandle,
            ErrorKind::PermissionDenied,
            ErrorKind::OutOfMemory,
            ErrorKind::InvalidSize,
            ErrorKind::TimedOut,
            ErrorKind::ConnectionLost,
            ErrorKind::DeviceError,
            ErrorKind::Unknown,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::from_u32(kind.to_u32()), kind);
        }
    }

    #[test]
    fn unrecognized_code_becomes_unknown() {
        assert_eq!(ErrorKind::from_u32(42), ErrorKind::Unknown);
        assert_eq!(ErrorKind::from_u32(u32::MAX), ErrorKind::Unknown);
    }

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(ErrorKind::InvalidFrame.to_u32(), 1);
        assert_eq!(ErrorKind::InvalidHandle.to_u32(), 2);
        assert_eq!(ErrorKind::OutOfMemory.to_u32(), 4);
        assert_eq!(ErrorKind::InvalidSize.to_u32(), 5);
        assert_eq!(ErrorKind::DeviceError.to_u32(), 8);
        assert_eq!(ErrorKind::Unknown.to_u32(), 99);
    }
}

//! Message kind codes.
//!
//! The kind table is a closed set; the numeric codes are part of the
//! wire contract and preserved from the protocol's first deployment so
//! that both sides of a migration interoperate during transition.

/// Operation code carried in the frame header.
///
/// Requests occupy the low code space; the two response kinds sit at
/// the top (`0xF0`/`0xF1`) so a response is recognizable at a glance in
/// ring dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Allocate device memory.
    Alloc = 0x01,
    /// Release device memory.
    Free = 0x02,
    /// Copy inline bytes into device memory.
    CopyToDevice = 0x10,
    /// Read device memory back to the requester.
    CopyFromDevice = 0x11,
    /// Copy between two device allocations.
    CopyOnDevice = 0x12,
    /// Fill a device range with a byte value.
    Memset = 0x13,
    /// Device-wide synchronization barrier.
    Sync = 0x21,
    /// Query broker-chosen device metadata.
    Info = 0x30,
    /// Successful response.
    Ok = 0xF0,
    /// Failed response.
    Error = 0xF1,
}

impl MessageKind {
    /// Wire code for this kind.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire code. `None` if the code is not in the kind table.
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x01 => Some(Self::Alloc),
            0x02 => Some(Self::Free),
            0x10 => Some(Self::CopyToDevice),
            0x11 => Some(Self::CopyFromDevice),
            0x12 => Some(Self::CopyOnDevice),
            0x13 => Some(Self::Memset),
            0x21 => Some(Self::Sync),
            0x30 => Some(Self::Info),
            0xF0 => Some(Self::Ok),
            0xF1 => Some(Self::Error),
            _ => None,
        }
    }

    /// True for kinds a tenant may send to the broker.
    #[must_use]
    pub const fn is_request(self) -> bool {
        !self.is_response()
    }

    /// True for the two response kinds.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(self, Self::Ok | Self::Error)
    }
}

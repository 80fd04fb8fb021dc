//! Client error types and the tenant-facing error-code mapping.

use gpumux_proto::{ErrorKind, ProtocolError};
use gpumux_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the client stub.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The broker answered with an ERROR frame.
    #[error("broker error ({kind}): {message}")]
    Broker {
        /// Wire error kind from the ERROR frame.
        kind: ErrorKind,
        /// Native driver code, zero if none.
        driver_code: i32,
        /// Broker-supplied message.
        message: String,
    },

    /// No matching response within the receive-retry budget.
    #[error("no response from broker")]
    Timeout,

    /// The requested transfer cannot fit a single message.
    #[error("transfer of {size} bytes exceeds per-message maximum {max}")]
    TooLarge {
        /// Requested transfer size.
        size: usize,
        /// Largest size a single message can carry.
        max: usize,
    },

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A response frame failed payload parsing.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Error codes of the driver API the stub intercepts.
///
/// This is the tenant-visible surface: whatever went wrong inside the
/// broker, the application sees one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Device or broker memory exhausted.
    OutOfMemory,
    /// The handle is unknown (to this tenant).
    InvalidHandle,
    /// Everything else: bad sizes, transport trouble, internal errors.
    InvalidValue,
}

impl ClientError {
    /// Map this error to the driver-API code the tenant application
    /// receives.
    #[must_use]
    pub fn api_code(&self) -> ApiErrorCode {
        match self {
            Self::Broker { kind: ErrorKind::OutOfMemory, .. } => ApiErrorCode::OutOfMemory,
            Self::Broker { kind: ErrorKind::InvalidHandle, .. } => ApiErrorCode::InvalidHandle,
            _ => ApiErrorCode::InvalidValue,
        }
    }
}

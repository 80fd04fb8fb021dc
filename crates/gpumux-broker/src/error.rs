//! Broker error types.

use thiserror::Error;

use crate::device::DeviceError;

/// Fatal broker errors.
///
/// Per-request failures never surface here — they become ERROR
/// responses and the broker keeps serving. This type covers startup
/// failures and transport states the loop cannot continue from.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The driver reported no usable device at startup.
    #[error("no GPU device available")]
    NoDevice,

    /// Device initialization failed (count query, selection, context).
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The transport failed fatally (init failure, closed underneath
    /// the loop).
    #[error(transparent)]
    Transport(#[from] gpumux_transport::TransportError),

    /// The broker was started without any tenant connection.
    #[error("no tenant connections")]
    NoConnections,
}

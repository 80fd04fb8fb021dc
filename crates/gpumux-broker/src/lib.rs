//! Trusted-zone GPU broker.
//!
//! The broker owns the only real device context and serves
//! allocation, transfer, synchronization, and metadata requests from
//! tenant zones over the IDM transport. Its security kernel is the
//! [`HandleTable`]: tenants only ever hold opaque handles, every
//! request is authorized against the handle's owner zone, and an
//! unauthorized access is indistinguishable from a missing handle.
//!
//! # Architecture
//!
//! - [`Broker`]: the receive-dispatch-respond loop plus lifecycle
//!   (device bring-up, statistics, signal-driven shutdown).
//! - [`HandleTable`]: ownership-indexed map from handles to device
//!   allocations.
//! - [`GpuDriver`]: the accelerator API boundary; [`HostGpu`] is the
//!   shipped host-memory emulation used in development and tests.
//!
//! Request dispatch itself is private; it is exercised through the
//! wire surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broker;
mod device;
mod dispatch;
mod error;
mod handle_table;

pub use broker::Broker;
pub use device::{DeviceError, GpuDriver, host::HostGpu};
pub use error::BrokerError;
pub use handle_table::{HandleTable, TableStats};

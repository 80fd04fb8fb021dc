//! Device driver abstraction.
//!
//! The broker calls the real accelerator API through the [`GpuDriver`]
//! trait; everything above it (dispatch, handle table, transport) is
//! driver-agnostic. Driver errors carry the driver's native code so
//! ERROR frames can pass it through to tenants unchanged.
//!
//! The shipped implementation is [`host::HostGpu`], a host-memory
//! emulation used by the development backend and the test suite. A
//! production build substitutes a driver binding with the same shape;
//! nothing else changes.

pub mod host;

use thiserror::Error;

/// An error returned by the underlying device driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("driver error {code}: {message}")]
pub struct DeviceError {
    /// The driver's native error code, passed through in ERROR frames.
    pub code: i32,
    /// Short driver-side description.
    pub message: String,
    /// Whether this is a device-memory exhaustion error. Dispatch maps
    /// these to the protocol's out-of-memory kind instead of the
    /// generic device-error kind.
    pub out_of_memory: bool,
}

impl DeviceError {
    /// A general driver failure.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), out_of_memory: false }
    }

    /// A device-memory exhaustion failure.
    #[must_use]
    pub fn out_of_memory(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), out_of_memory: true }
    }
}

/// The accelerator API surface the broker needs.
///
/// Implementations are exclusive to the broker; no allocation,
/// pointer, or context from a driver ever crosses the trust boundary.
/// All calls are synchronous from the broker's perspective.
pub trait GpuDriver: Send {
    /// Driver-side reference to one device allocation. Stored in the
    /// handle table; cloned out for the duration of a request.
    type Allocation: Clone + Send + 'static;

    /// Number of physical devices the driver can see.
    fn device_count(&self) -> Result<u32, DeviceError>;

    /// Bind this driver instance to one device.
    fn select_device(&mut self, index: u32) -> Result<(), DeviceError>;

    /// Create the device context all later calls run in.
    fn create_context(&mut self) -> Result<(), DeviceError>;

    /// Tear the context down. Idempotent; called during shutdown.
    fn destroy_context(&mut self);

    /// Marketing name of the selected device.
    fn device_name(&self) -> String;

    /// Total device memory in bytes.
    fn total_memory(&self) -> u64;

    /// Currently unallocated device memory in bytes.
    fn free_memory(&self) -> u64;

    /// Allocate `size` bytes of device memory.
    fn alloc(&mut self, size: u64) -> Result<Self::Allocation, DeviceError>;

    /// Release an allocation.
    fn free(&mut self, allocation: &Self::Allocation) -> Result<(), DeviceError>;

    /// Copy host bytes into `[offset, offset + bytes.len())` of the
    /// allocation.
    fn write(
        &mut self,
        dst: &Self::Allocation,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), DeviceError>;

    /// Read `len` bytes at `offset` out of the allocation.
    fn read(&mut self, src: &Self::Allocation, offset: u64, len: u64)
    -> Result<Vec<u8>, DeviceError>;

    /// Device-to-device copy between two allocations.
    fn copy(
        &mut self,
        dst: &Self::Allocation,
        dst_offset: u64,
        src: &Self::Allocation,
        src_offset: u64,
        len: u64,
    ) -> Result<(), DeviceError>;

    /// Fill `[offset, offset + len)` of the allocation with `value`.
    fn memset(
        &mut self,
        dst: &Self::Allocation,
        offset: u64,
        value: u8,
        len: u64,
    ) -> Result<(), DeviceError>;

    /// Device-wide synchronization barrier.
    fn synchronize(&mut self, flags: u64) -> Result<(), DeviceError>;
}

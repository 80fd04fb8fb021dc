//! Host-memory device emulation.
//!
//! Implements [`GpuDriver`] with plain heap buffers and a fixed
//! capacity budget. Transfers are byte-accurate and allocation
//! bookkeeping is exact, which is what the security tests need: a
//! round-trip through the broker must reproduce tenant bytes exactly,
//! and device-side usage must match handle-table statistics.

use std::collections::HashMap;

use super::{DeviceError, GpuDriver};

/// Native error codes of the emulated driver.
pub mod codes {
    /// A parameter (allocation key, offset, length) was invalid.
    pub const INVALID_VALUE: i32 = 1;
    /// Device memory exhausted.
    pub const OUT_OF_MEMORY: i32 = 2;
    /// An operation ran before `create_context`.
    pub const NOT_INITIALIZED: i32 = 3;
    /// `select_device` named a device that does not exist.
    pub const INVALID_DEVICE: i32 = 101;
}

/// Default emulated device memory: 256 MiB.
pub const DEFAULT_CAPACITY: u64 = 256 * 1024 * 1024;

/// Emulated single-device GPU backed by host memory.
pub struct HostGpu {
    capacity: u64,
    used: u64,
    next_key: u64,
    buffers: HashMap<u64, Vec<u8>>,
    selected: bool,
    context_live: bool,
}

impl Default for HostGpu {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HostGpu {
    /// Create an emulated device with `capacity` bytes of memory.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            next_key: 1,
            buffers: HashMap::new(),
            selected: false,
            context_live: false,
        }
    }

    /// Number of live allocations (test observability).
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.buffers.len()
    }

    fn require_context(&self) -> Result<(), DeviceError> {
        if self.context_live {
            Ok(())
        } else {
            Err(DeviceError::new(codes::NOT_INITIALIZED, "no device context"))
        }
    }

    fn buffer(&self, key: u64) -> Result<&Vec<u8>, DeviceError> {
        self.buffers
            .get(&key)
            .ok_or_else(|| DeviceError::new(codes::INVALID_VALUE, format!("bad allocation {key}")))
    }

    fn buffer_mut(&mut self, key: u64) -> Result<&mut Vec<u8>, DeviceError> {
        self.buffers
            .get_mut(&key)
            .ok_or_else(|| DeviceError::new(codes::INVALID_VALUE, format!("bad allocation {key}")))
    }

    fn check_range(buf_len: usize, offset: u64, len: u64) -> Result<(usize, usize), DeviceError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| DeviceError::new(codes::INVALID_VALUE, "range overflow"))?;
        if end > buf_len as u64 {
            return Err(DeviceError::new(
                codes::INVALID_VALUE,
                format!("range {offset}+{len} exceeds allocation of {buf_len}"),
            ));
        }
        Ok((offset as usize, end as usize))
    }
}

impl GpuDriver for HostGpu {
    type Allocation = u64;

    fn device_count(&self) -> Result<u32, DeviceError> {
        Ok(1)
    }

    fn select_device(&mut self, index: u32) -> Result<(), DeviceError> {
        if index != 0 {
            return Err(DeviceError::new(codes::INVALID_DEVICE, format!("no device {index}")));
        }
        self.selected = true;
        Ok(())
    }

    fn create_context(&mut self) -> Result<(), DeviceError> {
        if !self.selected {
            return Err(DeviceError::new(codes::INVALID_DEVICE, "no device selected"));
        }
        self.context_live = true;
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.context_live = false;
        self.buffers.clear();
        self.used = 0;
    }

    fn device_name(&self) -> String {
        "gpumux virtual gpu".to_string()
    }

    fn total_memory(&self) -> u64 {
        self.capacity
    }

    fn free_memory(&self) -> u64 {
        self.capacity - self.used
    }

    fn alloc(&mut self, size: u64) -> Result<u64, DeviceError> {
        self.require_context()?;

        let new_used = self
            .used
            .checked_add(size)
            .ok_or_else(|| DeviceError::out_of_memory(codes::OUT_OF_MEMORY, "size overflow"))?;
        if new_used > self.capacity {
            return Err(DeviceError::out_of_memory(
                codes::OUT_OF_MEMORY,
                format!("{size} bytes requested, {} free", self.free_memory()),
            ));
        }

        let key = self.next_key;
        self.next_key += 1;
        self.buffers.insert(key, vec![0u8; size as usize]);
        self.used = new_used;
        Ok(key)
    }

    fn free(&mut self, allocation: &u64) -> Result<(), DeviceError> {
        self.require_context()?;
        let buf = self.buffers.remove(allocation).ok_or_else(|| {
            DeviceError::new(codes::INVALID_VALUE, format!("bad allocation {allocation}"))
        })?;
        self.used -= buf.len() as u64;
        Ok(())
    }

    fn write(&mut self, dst: &u64, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        self.require_context()?;
        let buf = self.buffer_mut(*dst)?;
        let (start, end) = Self::check_range(buf.len(), offset, bytes.len() as u64)?;
        buf[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, src: &u64, offset: u64, len: u64) -> Result<Vec<u8>, DeviceError> {
        self.require_context()?;
        let buf = self.buffer(*src)?;
        let (start, end) = Self::check_range(buf.len(), offset, len)?;
        Ok(buf[start..end].to_vec())
    }

    fn copy(
        &mut self,
        dst: &u64,
        dst_offset: u64,
        src: &u64,
        src_offset: u64,
        len: u64,
    ) -> Result<(), DeviceError> {
        self.require_context()?;

        let src_buf = self.buffer(*src)?;
        let (src_start, src_end) = Self::check_range(src_buf.len(), src_offset, len)?;
        let staged = src_buf[src_start..src_end].to_vec();

        let dst_buf = self.buffer_mut(*dst)?;
        let (dst_start, dst_end) = Self::check_range(dst_buf.len(), dst_offset, len)?;
        dst_buf[dst_start..dst_end].copy_from_slice(&staged);
        Ok(())
    }

    fn memset(&mut self, dst: &u64, offset: u64, value: u8, len: u64) -> Result<(), DeviceError> {
        self.require_context()?;
        let buf = self.buffer_mut(*dst)?;
        let (start, end) = Self::check_range(buf.len(), offset, len)?;
        buf[start..end].fill(value);
        Ok(())
    }

    fn synchronize(&mut self, _flags: u64) -> Result<(), DeviceError> {
        self.require_context()
    }
}

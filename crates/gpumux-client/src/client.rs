//! The tenant-side client stub.
//!
//! One [`GpuClient`] per tenant zone. Every API call is synchronous:
//! build a typed request, send it, then receive until the response
//! whose `request_seq` matches arrives. Responses for other sequence
//! numbers (stale answers to abandoned calls) are discarded — the
//! single-client model guarantees no other waiter exists for them.
//!
//! The stub never learns broker addresses, offsets, or layouts; the
//! only device identifier it ever holds is the opaque handle value.

use std::time::Duration;

use bytes::Bytes;
use gpumux_proto::{
    AllocRequest, CopyFromDeviceRequest, CopyOnDeviceRequest, CopyToDeviceRequest, FreeRequest,
    InfoRequest, InfoSelector, MemsetRequest, MessageHeader, OkResponse, Payload, SyncRequest,
    ZoneId,
};
use gpumux_transport::{Backend, Role, Transport, TransportError};

use crate::error::ClientError;

/// Receives attempted per call before declaring a timeout.
pub const RECV_RETRY_BUDGET: u32 = 10;

/// Wait per receive attempt.
const RECV_TIMEOUT_MS: i32 = 1000;

/// Retries while the tx ring is full before giving up on a send.
const SEND_RETRIES: u32 = 50;

/// Largest host-to-device write a single request can carry.
pub const MAX_WRITE_SIZE: usize =
    MessageHeader::MAX_PAYLOAD_SIZE as usize - CopyToDeviceRequest::SIZE;

/// Largest device-to-host read a single response can carry.
pub const MAX_READ_SIZE: usize = MessageHeader::MAX_PAYLOAD_SIZE as usize - OkResponse::SIZE;

/// Synchronous client for one tenant zone.
pub struct GpuClient {
    transport: Transport,
}

impl GpuClient {
    /// Open the transport toward the broker in the client role.
    pub fn connect(
        backend: Backend,
        local: ZoneId,
        broker: ZoneId,
    ) -> Result<Self, ClientError> {
        let transport = Transport::open(backend, local, broker, Role::Client)?;
        Ok(Self { transport })
    }

    /// Tenant zone this client speaks for.
    #[must_use]
    pub fn zone(&self) -> ZoneId {
        self.transport.local_zone()
    }

    /// Allocate `size` bytes of device memory; returns the handle.
    pub fn alloc(&mut self, size: u64, flags: u64) -> Result<u64, ClientError> {
        let (resp, _) = self.roundtrip(Payload::Alloc(AllocRequest::new(size, flags)))?;
        Ok(resp.result_handle())
    }

    /// Release the allocation behind `handle`.
    pub fn free(&mut self, handle: u64) -> Result<(), ClientError> {
        self.roundtrip(Payload::Free(FreeRequest::new(handle)))?;
        Ok(())
    }

    /// Write `bytes` into the allocation at `offset`.
    pub fn copy_to_device(
        &mut self,
        handle: u64,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), ClientError> {
        if bytes.len() > MAX_WRITE_SIZE {
            return Err(ClientError::TooLarge { size: bytes.len(), max: MAX_WRITE_SIZE });
        }

        let req = CopyToDeviceRequest::new(handle, offset, bytes.len() as u64);
        self.roundtrip(Payload::CopyToDevice(req, Bytes::copy_from_slice(bytes)))?;
        Ok(())
    }

    /// Read `size` bytes from the allocation at `offset`.
    pub fn copy_from_device(
        &mut self,
        handle: u64,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, ClientError> {
        if size as usize > MAX_READ_SIZE {
            return Err(ClientError::TooLarge { size: size as usize, max: MAX_READ_SIZE });
        }

        let (_, data) =
            self.roundtrip(Payload::CopyFromDevice(CopyFromDeviceRequest::new(
                handle, offset, size,
            )))?;
        Ok(data.to_vec())
    }

    /// Device-to-device copy between two allocations of this zone.
    pub fn copy_on_device(
        &mut self,
        dst_handle: u64,
        dst_offset: u64,
        src_handle: u64,
        src_offset: u64,
        size: u64,
    ) -> Result<(), ClientError> {
        self.roundtrip(Payload::CopyOnDevice(CopyOnDeviceRequest::new(
            dst_handle, dst_offset, src_handle, src_offset, size,
        )))?;
        Ok(())
    }

    /// Fill `size` bytes of the allocation with `value` at `offset`.
    pub fn memset(
        &mut self,
        handle: u64,
        offset: u64,
        value: u8,
        size: u64,
    ) -> Result<(), ClientError> {
        self.roundtrip(Payload::Memset(MemsetRequest::new(handle, offset, value, size)))?;
        Ok(())
    }

    /// Device-wide synchronization barrier.
    pub fn synchronize(&mut self, flags: u64) -> Result<(), ClientError> {
        self.roundtrip(Payload::Sync(SyncRequest::new(flags)))?;
        Ok(())
    }

    /// Number of devices visible to this tenant.
    pub fn device_count(&mut self) -> Result<u64, ClientError> {
        let (resp, _) = self.info(InfoSelector::DeviceCount)?;
        Ok(resp.result_value())
    }

    /// Virtual device name.
    pub fn device_name(&mut self) -> Result<String, ClientError> {
        let (_, data) = self.info(InfoSelector::DeviceName)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Total device memory in bytes.
    pub fn total_memory(&mut self) -> Result<u64, ClientError> {
        let (resp, _) = self.info(InfoSelector::TotalMemory)?;
        Ok(resp.result_value())
    }

    /// Currently free device memory in bytes.
    pub fn free_memory(&mut self) -> Result<u64, ClientError> {
        let (resp, _) = self.info(InfoSelector::FreeMemory)?;
        Ok(resp.result_value())
    }

    /// Broker API version, packed `(major << 8) | minor`.
    pub fn api_version(&mut self) -> Result<u64, ClientError> {
        let (resp, _) = self.info(InfoSelector::ApiVersion)?;
        Ok(resp.result_value())
    }

    fn info(&mut self, selector: InfoSelector) -> Result<(OkResponse, Bytes), ClientError> {
        self.roundtrip(Payload::Info(InfoRequest::new(selector)))
    }

    /// Close the transport. Later calls fail with a transport error.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// One blocking request/response exchange.
    ///
    /// Receives are bounded by [`RECV_RETRY_BUDGET`]; each attempt
    /// waits up to a second. Responses whose `request_seq` does not
    /// match are discarded, as are unparseable frames (they consume an
    /// attempt but cannot wedge the call).
    fn roundtrip(&mut self, payload: Payload) -> Result<(OkResponse, Bytes), ClientError> {
        let frame = self.transport.build(payload);
        let seq = frame.header.seq_num();

        let mut sent = false;
        for _ in 0..SEND_RETRIES {
            match self.transport.send(&frame) {
                Ok(()) => {
                    sent = true;
                    break;
                },
                Err(TransportError::RingFull) => std::thread::sleep(Duration::from_millis(1)),
                Err(err) => return Err(err.into()),
            }
        }
        if !sent {
            return Err(ClientError::Transport(TransportError::RingFull));
        }

        for _ in 0..RECV_RETRY_BUDGET {
            let frame = match self.transport.recv(RECV_TIMEOUT_MS) {
                Ok(frame) => frame,
                Err(TransportError::TimedOut) => continue,
                Err(TransportError::InvalidFrame(err)) => {
                    tracing::warn!(%err, "discarding invalid response frame");
                    continue;
                },
                Err(err) => return Err(err.into()),
            };

            match Payload::from_frame(&frame) {
                Ok(Payload::Ok(resp, data)) if resp.request_seq() == seq => {
                    return Ok((resp, data));
                },
                Ok(Payload::Error(resp, message)) if resp.request_seq() == seq => {
                    return Err(ClientError::Broker {
                        kind: resp.kind(),
                        driver_code: resp.driver_code(),
                        message,
                    });
                },
                Ok(other) => {
                    tracing::debug!(
                        awaiting = seq,
                        kind = ?other.kind(),
                        "discarding mismatched response"
                    );
                },
                Err(err) => {
                    tracing::warn!(%err, "discarding unparseable response payload");
                },
            }
        }

        Err(ClientError::Timeout)
    }
}

impl std::fmt::Debug for GpuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuClient").field("zone", &self.zone()).finish()
    }
}

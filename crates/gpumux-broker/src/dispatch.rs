//! Request dispatch: one handler per message kind.
//!
//! Every handler walks the same pipeline — authorize, bounds-check,
//! execute — and returns an [`Outcome`]. A single emitter
//! ([`Outcome::into_payload`]) serializes the outcome to the wire, so
//! no handler can forget to echo the request sequence number or leak a
//! partial response.
//!
//! The authorization step is always the handle table: a handle that is
//! missing or foreign yields the invalid-handle error, and nothing
//! later in the pipeline runs. Bounds checks use checked arithmetic so
//! an offset/size pair that wraps cannot pass.

use bytes::Bytes;
use gpumux_proto::{
    CopyFromDeviceRequest, CopyOnDeviceRequest, CopyToDeviceRequest, ErrorKind, InfoRequest,
    InfoSelector, MemsetRequest, MessageHeader, OkResponse, Payload, SyncRequest, ZoneId,
};

use crate::device::{DeviceError, GpuDriver};
use crate::handle_table::HandleTable;

/// Result of dispatching one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Respond OK.
    Ok {
        /// Handle for ALLOC responses; zero otherwise.
        result_handle: u64,
        /// Scalar for GET_INFO responses; zero otherwise.
        result_value: u64,
        /// Inline data for COPY_D2H and name queries.
        data: Bytes,
    },
    /// Respond ERROR.
    Err {
        /// Wire error kind.
        kind: ErrorKind,
        /// Native driver code, zero if no driver call was involved.
        driver_code: i32,
        /// Short human-readable message.
        message: String,
    },
}

impl Outcome {
    fn ok() -> Self {
        Self::Ok { result_handle: 0, result_value: 0, data: Bytes::new() }
    }

    fn ok_handle(handle: u64) -> Self {
        Self::Ok { result_handle: handle, result_value: 0, data: Bytes::new() }
    }

    fn ok_value(value: u64) -> Self {
        Self::Ok { result_handle: 0, result_value: value, data: Bytes::new() }
    }

    fn ok_data(data: Bytes) -> Self {
        Self::Ok { result_handle: 0, result_value: 0, data }
    }

    pub(crate) fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Err { kind, driver_code: 0, message: message.into() }
    }

    fn device(err: &DeviceError) -> Self {
        let kind =
            if err.out_of_memory { ErrorKind::OutOfMemory } else { ErrorKind::DeviceError };
        Self::Err { kind, driver_code: err.code, message: err.message.clone() }
    }

    /// Whether this outcome is an error of the given kind (tests).
    #[cfg(test)]
    pub(crate) fn is_err_kind(&self, expected: ErrorKind) -> bool {
        matches!(self, Self::Err { kind, .. } if *kind == expected)
    }

    /// Serialize the outcome as the response payload for `request_seq`.
    pub(crate) fn into_payload(self, request_seq: u64) -> Payload {
        match self {
            Self::Ok { result_handle, result_value, data } => {
                Payload::ok(request_seq, result_handle, result_value, data)
            },
            Self::Err { kind, driver_code, message } => {
                Payload::error(request_seq, kind, driver_code, &message)
            },
        }
    }
}

/// Largest COPY_D2H read whose OK response still fits one ring slot.
pub(crate) const MAX_READ_SIZE: u64 =
    (MessageHeader::MAX_PAYLOAD_SIZE as usize - OkResponse::SIZE) as u64;

/// `[offset, offset + size)` fully contained in `[0, alloc_size)`,
/// with overflow safety.
fn range_ok(offset: u64, size: u64, alloc_size: u64) -> bool {
    offset.checked_add(size).is_some_and(|end| end <= alloc_size)
}

/// Dispatch a parsed request payload from `src_zone`.
///
/// Response-kind payloads never reach this function; the broker loop
/// rejects them during frame validation.
pub(crate) fn dispatch<D: GpuDriver>(
    src_zone: ZoneId,
    payload: &Payload,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    match payload {
        Payload::Alloc(req) => alloc(src_zone, req.size(), req.flags(), table, driver),
        Payload::Free(req) => free(src_zone, req.handle(), table, driver),
        Payload::CopyToDevice(req, data) => copy_to_device(src_zone, req, data, table, driver),
        Payload::CopyFromDevice(req) => copy_from_device(src_zone, req, table, driver),
        Payload::CopyOnDevice(req) => copy_on_device(src_zone, req, table, driver),
        Payload::Memset(req) => memset(src_zone, req, table, driver),
        Payload::Sync(req) => sync(req, driver),
        Payload::Info(req) => info(req, driver),
        Payload::Ok(..) | Payload::Error(..) => {
            Outcome::err(ErrorKind::InvalidFrame, "response kind sent as request")
        },
    }
}

fn alloc<D: GpuDriver>(
    src_zone: ZoneId,
    size: u64,
    flags: u64,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    let _ = flags; // reserved; no allocation flags defined yet

    let resource = match driver.alloc(size) {
        Ok(resource) => resource,
        Err(err) => return Outcome::device(&err),
    };

    let handle = table.insert(src_zone, resource.clone(), size);
    if handle == 0 {
        // Roll the device allocation back; nothing references it.
        if let Err(err) = driver.free(&resource) {
            tracing::error!(%err, "leaked allocation rolling back failed insert");
        }
        return Outcome::err(ErrorKind::OutOfMemory, "handle table exhausted");
    }

    Outcome::ok_handle(handle)
}

fn free<D: GpuDriver>(
    src_zone: ZoneId,
    handle: u64,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    let Some(resource) = table.remove(src_zone, handle) else {
        return Outcome::err(ErrorKind::InvalidHandle, "no such handle");
    };

    // The record is already unlinked; on driver failure it stays gone.
    // Reinserting would hand back a handle to memory in unknown state.
    match driver.free(&resource) {
        Ok(()) => Outcome::ok(),
        Err(err) => Outcome::device(&err),
    }
}

fn copy_to_device<D: GpuDriver>(
    src_zone: ZoneId,
    req: &CopyToDeviceRequest,
    data: &Bytes,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    let Some((resource, alloc_size)) = table.lookup(src_zone, req.dst_handle()) else {
        return Outcome::err(ErrorKind::InvalidHandle, "no such handle");
    };

    if !range_ok(req.dst_offset(), req.size(), alloc_size) {
        return Outcome::err(ErrorKind::InvalidSize, "write exceeds allocation bounds");
    }

    if data.len() as u64 != req.size() {
        return Outcome::err(ErrorKind::InvalidFrame, "inline data length mismatch");
    }

    match driver.write(&resource, req.dst_offset(), data) {
        Ok(()) => Outcome::ok(),
        Err(err) => Outcome::device(&err),
    }
}

fn copy_from_device<D: GpuDriver>(
    src_zone: ZoneId,
    req: &CopyFromDeviceRequest,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    let Some((resource, alloc_size)) = table.lookup(src_zone, req.src_handle()) else {
        return Outcome::err(ErrorKind::InvalidHandle, "no such handle");
    };

    if !range_ok(req.src_offset(), req.size(), alloc_size) {
        return Outcome::err(ErrorKind::InvalidSize, "read exceeds allocation bounds");
    }

    // The read bytes travel inline in the OK response, which must
    // still fit one ring slot.
    if req.size() > MAX_READ_SIZE {
        return Outcome::err(
            ErrorKind::InvalidSize,
            format!("read of {} exceeds per-message maximum {}", req.size(), MAX_READ_SIZE),
        );
    }

    match driver.read(&resource, req.src_offset(), req.size()) {
        Ok(buffer) => Outcome::ok_data(Bytes::from(buffer)),
        Err(err) => Outcome::device(&err),
    }
}

fn copy_on_device<D: GpuDriver>(
    src_zone: ZoneId,
    req: &CopyOnDeviceRequest,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    // Both handles authorize against the requesting zone; cross-zone
    // copies fail exactly like missing handles.
    let Some((dst, dst_size)) = table.lookup(src_zone, req.dst_handle()) else {
        return Outcome::err(ErrorKind::InvalidHandle, "no such handle");
    };
    let Some((src, src_size)) = table.lookup(src_zone, req.src_handle()) else {
        return Outcome::err(ErrorKind::InvalidHandle, "no such handle");
    };

    if !range_ok(req.dst_offset(), req.size(), dst_size)
        || !range_ok(req.src_offset(), req.size(), src_size)
    {
        return Outcome::err(ErrorKind::InvalidSize, "copy exceeds allocation bounds");
    }

    match driver.copy(&dst, req.dst_offset(), &src, req.src_offset(), req.size()) {
        Ok(()) => Outcome::ok(),
        Err(err) => Outcome::device(&err),
    }
}

fn memset<D: GpuDriver>(
    src_zone: ZoneId,
    req: &MemsetRequest,
    table: &HandleTable<D::Allocation>,
    driver: &mut D,
) -> Outcome {
    let Some((resource, alloc_size)) = table.lookup(src_zone, req.handle()) else {
        return Outcome::err(ErrorKind::InvalidHandle, "no such handle");
    };

    if !range_ok(req.offset(), req.size(), alloc_size) {
        return Outcome::err(ErrorKind::InvalidSize, "fill exceeds allocation bounds");
    }

    match driver.memset(&resource, req.offset(), req.value(), req.size()) {
        Ok(()) => Outcome::ok(),
        Err(err) => Outcome::device(&err),
    }
}

fn sync<D: GpuDriver>(req: &SyncRequest, driver: &mut D) -> Outcome {
    match driver.synchronize(req.flags()) {
        Ok(()) => Outcome::ok(),
        Err(err) => Outcome::device(&err),
    }
}

fn info<D: GpuDriver>(req: &InfoRequest, driver: &mut D) -> Outcome {
    // Everything returned here is virtual device metadata; no broker
    // address or driver pointer is representable in the reply.
    match req.selector() {
        Some(InfoSelector::DeviceCount) => Outcome::ok_value(1),
        Some(InfoSelector::DeviceName) => Outcome::ok_data(Bytes::from(driver.device_name())),
        Some(InfoSelector::TotalMemory) => Outcome::ok_value(driver.total_memory()),
        Some(InfoSelector::FreeMemory) => Outcome::ok_value(driver.free_memory()),
        Some(InfoSelector::ApiVersion) => Outcome::ok_value(u64::from(MessageHeader::VERSION)),
        None => Outcome::err(
            ErrorKind::InvalidFrame,
            format!("unknown info selector {}", req.selector_raw()),
        ),
    }
}

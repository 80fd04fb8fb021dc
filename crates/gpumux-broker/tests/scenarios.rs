//! End-to-end scenarios: a live broker thread serving real client
//! stubs over the in-process memory backend.
//!
//! Each test stands up the full stack — client stub, rings, broker
//! loop, handle table, emulated device — and drives it through the
//! tenant-visible API only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use gpumux_broker::{Broker, BrokerError, DeviceError, GpuDriver, HostGpu};
use gpumux_client::{ApiErrorCode, ClientError, GpuClient};
use gpumux_proto::{AllocRequest, ErrorKind, Payload, ZoneId};
use gpumux_transport::{Backend, MemoryLink, Role, Transport, TransportError};

const BROKER_ZONE: ZoneId = ZoneId(1);
const TENANT_A: ZoneId = ZoneId(2);
const TENANT_B: ZoneId = ZoneId(3);

const DEVICE_MEMORY: u64 = 64 * 1024 * 1024;

/// A broker loop running on its own thread, stopped on drop.
struct TestBroker {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), BrokerError>>>,
}

impl TestBroker {
    fn start(links: &[MemoryLink]) -> Self {
        let connections: Vec<Transport> = links
            .iter()
            .map(|link| {
                Transport::open(
                    Backend::Memory(link.clone()),
                    link.server_zone(),
                    link.client_zone(),
                    Role::Server,
                )
                .expect("server transport")
            })
            .collect();

        let mut broker =
            Broker::start(connections, HostGpu::new(DEVICE_MEMORY)).expect("broker start");
        let shutdown = broker.shutdown_flag();
        let thread = std::thread::spawn(move || broker.run());

        Self { shutdown, thread: Some(thread) }
    }

    fn stop(&mut self) -> Result<(), BrokerError> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.thread.take() {
            Some(thread) => thread.join().expect("broker thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn connect(link: &MemoryLink) -> GpuClient {
    GpuClient::connect(Backend::Memory(link.clone()), link.client_zone(), link.server_zone())
        .expect("client connect")
}

fn single_tenant() -> (TestBroker, GpuClient, MemoryLink) {
    let link = MemoryLink::new(BROKER_ZONE, TENANT_A);
    let broker = TestBroker::start(std::slice::from_ref(&link));
    let client = connect(&link);
    (broker, client, link)
}

fn api_code(result: &ClientError) -> ApiErrorCode {
    result.api_code()
}

/// Scenario A: alloc/free round-trip, then double free.
#[test]
fn alloc_free_round_trip() {
    let (_broker, mut client, _link) = single_tenant();

    let h1 = client.alloc(1024, 0).expect("alloc");
    assert_ne!(h1, 0);

    client.free(h1).expect("free");

    let err = client.free(h1).expect_err("second free must fail");
    match &err {
        ClientError::Broker { kind, .. } => assert_eq!(*kind, ErrorKind::InvalidHandle),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api_code(&err), ApiErrorCode::InvalidHandle);
}

/// Scenario B: a handle is invisible to every zone but its owner.
#[test]
fn cross_tenant_isolation() {
    let link_a = MemoryLink::new(BROKER_ZONE, TENANT_A);
    let link_b = MemoryLink::new(BROKER_ZONE, TENANT_B);
    let _broker = TestBroker::start(&[link_a.clone(), link_b.clone()]);

    let mut tenant_a = connect(&link_a);
    let mut tenant_b = connect(&link_b);

    let baseline = tenant_a.free_memory().expect("free_memory");

    let h = tenant_a.alloc(2048, 0).expect("alloc");
    assert_ne!(h, 0);

    // Tenant B cannot free, read, or even confirm the handle exists.
    let free_err = tenant_b.free(h).expect_err("foreign free must fail");
    match &free_err {
        ClientError::Broker { kind, .. } => assert_eq!(*kind, ErrorKind::InvalidHandle),
        other => panic!("unexpected error: {other:?}"),
    }

    let read_err = tenant_b.copy_from_device(h, 0, 16).expect_err("foreign read must fail");
    match &read_err {
        ClientError::Broker { kind, .. } => assert_eq!(*kind, ErrorKind::InvalidHandle),
        other => panic!("unexpected error: {other:?}"),
    }

    // The record survived both attacks: the device still carries the
    // 2048 bytes, and the owner can free it normally.
    assert_eq!(tenant_a.free_memory().expect("free_memory"), baseline - 2048);
    tenant_a.free(h).expect("owner free");
    assert_eq!(tenant_a.free_memory().expect("free_memory"), baseline);
}

/// Scenario C: data written from the tenant reads back identically.
#[test]
fn data_round_trip() {
    let (_broker, mut client, _link) = single_tenant();

    let h = client.alloc(256, 0).expect("alloc");
    let pattern: Vec<u8> = (0..=255).collect();

    client.copy_to_device(h, 0, &pattern).expect("write");
    let readback = client.copy_from_device(h, 0, 256).expect("read");
    assert_eq!(readback, pattern);

    client.free(h).expect("free");
}

/// Scenario D: an out-of-bounds write is rejected and the contents
/// stay intact.
#[test]
fn bounds_violation_rejected() {
    let (_broker, mut client, _link) = single_tenant();

    let h = client.alloc(100, 0).expect("alloc");
    let pattern = vec![0x42u8; 100];
    client.copy_to_device(h, 0, &pattern).expect("write");

    // offset 50 + size 60 overruns the 100-byte allocation.
    let err = client.copy_to_device(h, 50, &[0u8; 60]).expect_err("oob write must fail");
    match &err {
        ClientError::Broker { kind, .. } => assert_eq!(*kind, ErrorKind::InvalidSize),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api_code(&err), ApiErrorCode::InvalidValue);

    assert_eq!(client.copy_from_device(h, 0, 100).expect("read"), pattern);
    client.free(h).expect("free");
}

/// Scenario E: double-free neither succeeds nor damages neighbors.
#[test]
fn double_free_attack() {
    let (_broker, mut client, _link) = single_tenant();

    let h1 = client.alloc(1024, 0).expect("alloc h1");
    let h2 = client.alloc(1024, 0).expect("alloc h2");
    assert_ne!(h1, h2);

    client.free(h1).expect("first free");

    let err = client.free(h1).expect_err("double free must fail");
    match &err {
        ClientError::Broker { kind, .. } => assert_eq!(*kind, ErrorKind::InvalidHandle),
        other => panic!("unexpected error: {other:?}"),
    }

    // h2 is untouched by the attack.
    client.copy_to_device(h2, 0, &[7u8; 1024]).expect("h2 still writable");
    assert_eq!(client.copy_from_device(h2, 0, 1024).expect("read"), vec![7u8; 1024]);
    client.free(h2).expect("free h2");
}

/// Scenario F: garbage on the ring is dropped; valid requests before
/// and after proceed normally and the handle table is not touched.
#[test]
fn malformed_frame_ignored() {
    let link = MemoryLink::new(BROKER_ZONE, TENANT_A);
    let _broker = TestBroker::start(std::slice::from_ref(&link));

    // Raw transport instead of the stub, so the test can put hostile
    // bytes on the ring directly.
    let mut raw =
        Transport::open(Backend::Memory(link.clone()), TENANT_A, BROKER_ZONE, Role::Client)
            .expect("raw transport");

    raw.inject_raw(&[0xDE; 128]).expect("inject garbage");

    // A well-formed request right behind the garbage.
    let request = raw.build(Payload::Alloc(AllocRequest::new(64, 0)));
    let request_seq = request.header.seq_num();
    raw.send(&request).expect("send");

    // The only response that ever arrives is the one for our request.
    let response = loop {
        match raw.recv(2000) {
            Ok(frame) => break frame,
            Err(TransportError::TimedOut) => {},
            Err(err) => panic!("recv failed: {err}"),
        }
    };

    match Payload::from_frame(&response).expect("response payload") {
        Payload::Ok(resp, _) => {
            assert_eq!(resp.request_seq(), request_seq);
            assert_ne!(resp.result_handle(), 0);
        },
        other => panic!("expected OK, got {other:?}"),
    }

    // Nothing further is queued for the garbage frame.
    assert!(matches!(raw.recv(100), Err(TransportError::TimedOut)));
}

/// Every response correlates to exactly one outstanding request, even
/// when requests are pipelined ahead of the replies.
#[test]
fn pipelined_requests_correlate_by_sequence() {
    let link = MemoryLink::new(BROKER_ZONE, TENANT_A);
    let _broker = TestBroker::start(std::slice::from_ref(&link));

    let mut raw =
        Transport::open(Backend::Memory(link.clone()), TENANT_A, BROKER_ZONE, Role::Client)
            .expect("raw transport");

    let mut outstanding = std::collections::HashSet::new();
    for size in [16u64, 32, 64, 128, 256] {
        let frame = raw.build(Payload::Alloc(AllocRequest::new(size, 0)));
        outstanding.insert(frame.header.seq_num());
        raw.send(&frame).expect("send");
    }

    while !outstanding.is_empty() {
        let frame = match raw.recv(2000) {
            Ok(frame) => frame,
            Err(TransportError::TimedOut) => continue,
            Err(err) => panic!("recv failed: {err}"),
        };
        match Payload::from_frame(&frame).expect("payload") {
            Payload::Ok(resp, _) => {
                assert!(
                    outstanding.remove(&resp.request_seq()),
                    "response for unknown or duplicate sequence {}",
                    resp.request_seq()
                );
            },
            other => panic!("expected OK, got {other:?}"),
        }
    }
}

/// GET_INFO exposes only virtual device metadata.
#[test]
fn device_info_is_virtual() {
    let (_broker, mut client, _link) = single_tenant();

    assert_eq!(client.device_count().expect("count"), 1);
    assert_eq!(client.device_name().expect("name"), "gpumux virtual gpu");
    assert_eq!(client.total_memory().expect("total"), DEVICE_MEMORY);
    assert_eq!(
        client.api_version().expect("version"),
        u64::from(gpumux_proto::MessageHeader::VERSION)
    );
}

/// Memset and device-to-device copy through the public surface.
#[test]
fn memset_and_device_copy() {
    let (_broker, mut client, _link) = single_tenant();

    let src = client.alloc(64, 0).expect("alloc src");
    let dst = client.alloc(64, 0).expect("alloc dst");

    client.memset(src, 0, 0xAB, 64).expect("memset");
    client.copy_on_device(dst, 0, src, 0, 64).expect("d2d copy");
    client.synchronize(0).expect("sync");

    assert_eq!(client.copy_from_device(dst, 0, 64).expect("read"), vec![0xAB; 64]);

    client.free(src).expect("free src");
    client.free(dst).expect("free dst");
}

/// Clean shutdown: the loop exits on the flag and the run returns Ok
/// with outstanding handles released internally.
#[test]
fn shutdown_releases_cleanly() {
    let (mut broker, mut client, _link) = single_tenant();

    let _h1 = client.alloc(4096, 0).expect("alloc");
    let _h2 = client.alloc(4096, 0).expect("alloc");

    broker.stop().expect("clean shutdown");
}

/// A driver with no devices is a fatal startup error.
#[test]
fn startup_fails_without_device() {
    struct NoGpu;

    impl GpuDriver for NoGpu {
        type Allocation = u64;

        fn device_count(&self) -> Result<u32, DeviceError> {
            Ok(0)
        }
        fn select_device(&mut self, _index: u32) -> Result<(), DeviceError> {
            Err(DeviceError::new(101, "no device"))
        }
        fn create_context(&mut self) -> Result<(), DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn destroy_context(&mut self) {}
        fn device_name(&self) -> String {
            String::new()
        }
        fn total_memory(&self) -> u64 {
            0
        }
        fn free_memory(&self) -> u64 {
            0
        }
        fn alloc(&mut self, _size: u64) -> Result<u64, DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn free(&mut self, _allocation: &u64) -> Result<(), DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn write(&mut self, _dst: &u64, _offset: u64, _bytes: &[u8]) -> Result<(), DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn read(&mut self, _src: &u64, _offset: u64, _len: u64) -> Result<Vec<u8>, DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn copy(
            &mut self,
            _dst: &u64,
            _dst_offset: u64,
            _src: &u64,
            _src_offset: u64,
            _len: u64,
        ) -> Result<(), DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn memset(
            &mut self,
            _dst: &u64,
            _offset: u64,
            _value: u8,
            _len: u64,
        ) -> Result<(), DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
        fn synchronize(&mut self, _flags: u64) -> Result<(), DeviceError> {
            Err(DeviceError::new(3, "no device"))
        }
    }

    let link = MemoryLink::new(BROKER_ZONE, TENANT_A);
    let connection =
        Transport::open(Backend::Memory(link.clone()), BROKER_ZONE, TENANT_A, Role::Server)
            .expect("transport");

    assert!(matches!(Broker::start(vec![connection], NoGpu), Err(BrokerError::NoDevice)));
}

/// Starting with zero connections is rejected.
#[test]
fn startup_fails_without_connections() {
    assert!(matches!(
        Broker::start(Vec::new(), HostGpu::new(1024)),
        Err(BrokerError::NoConnections)
    ));
}

//! Property-based tests for frame encoding/decoding.
//!
//! These tests verify that frame serialization is correct for ALL valid
//! inputs, not just specific examples, and that malformed wire bytes
//! never decode into a structurally valid frame.

use bytes::Bytes;
use gpumux_proto::{
    AllocRequest, CopyToDeviceRequest, ErrorKind, Frame, MessageHeader, MessageKind, Payload,
    SyncRequest, ZoneId,
};
use proptest::prelude::*;

/// Strategy for generating arbitrary message kinds.
fn arbitrary_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Alloc),
        Just(MessageKind::Free),
        Just(MessageKind::CopyToDevice),
        Just(MessageKind::CopyFromDevice),
        Just(MessageKind::CopyOnDevice),
        Just(MessageKind::Memset),
        Just(MessageKind::Sync),
        Just(MessageKind::Info),
        Just(MessageKind::Ok),
        Just(MessageKind::Error),
    ]
}

/// Strategy for generating arbitrary frame headers.
fn arbitrary_header() -> impl Strategy<Value = MessageHeader> {
    (arbitrary_kind(), any::<u32>(), any::<u32>(), any::<u64>()).prop_map(
        |(kind, src, dst, seq)| {
            let mut header = MessageHeader::new(kind);
            header.set_src_zone(ZoneId(src));
            header.set_dst_zone(ZoneId(dst));
            header.set_seq_num(seq);
            header
        },
    )
}

/// Strategy for generating frames with payloads up to 1 KB.
fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_header(), prop::collection::vec(any::<u8>(), 0..1024))
        .prop_map(|(header, payload)| Frame::new(header, payload))
}

proptest! {
    /// Round-trip: encode then decode yields the original frame.
    #[test]
    fn frame_wire_round_trip(frame in arbitrary_frame()) {
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("encode");

        let parsed = Frame::decode(&wire).expect("decode");
        prop_assert_eq!(frame.header, parsed.header);
        prop_assert_eq!(frame.payload, parsed.payload);
    }

    /// Flipping any single header byte in magic/version either fails
    /// decoding or yields the identical header; it never produces a
    /// different valid header.
    #[test]
    fn corrupted_magic_or_version_rejected(
        frame in arbitrary_frame(),
        byte_index in 0usize..6,
        xor in 1u8..=255,
    ) {
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("encode");
        wire[byte_index] ^= xor;

        prop_assert!(Frame::decode(&wire).is_err());
    }

    /// A header that claims more payload than is present never decodes.
    #[test]
    fn truncated_payload_rejected(
        frame in arbitrary_frame(),
        cut in 1usize..64,
    ) {
        prop_assume!(!frame.payload.is_empty());

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("encode");
        let cut = cut.min(frame.payload.len());
        wire.truncate(wire.len() - cut);

        prop_assert!(Frame::decode(&wire).is_err());
    }

    /// Sequence numbers survive the wire byte-exactly.
    #[test]
    fn seq_num_preserved(seq in any::<u64>()) {
        let mut header = MessageHeader::new(MessageKind::Sync);
        header.set_seq_num(seq);
        let frame = Payload::Sync(SyncRequest::new(0)).into_frame(header);

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("encode");
        let parsed = Frame::decode(&wire).expect("decode");

        prop_assert_eq!(parsed.header.seq_num(), seq);
    }

    /// Typed payload round-trip through a full frame.
    #[test]
    fn alloc_payload_round_trip(size in any::<u64>(), flags in any::<u64>()) {
        let payload = Payload::Alloc(AllocRequest::new(size, flags));
        let frame = payload.clone().into_frame(MessageHeader::new(MessageKind::Alloc));

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("encode");
        let parsed = Frame::decode(&wire).expect("decode");

        prop_assert_eq!(Payload::from_frame(&parsed).expect("payload"), payload);
    }

    /// Inline copy data rides along byte-exactly.
    #[test]
    fn inline_data_round_trip(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let req = CopyToDeviceRequest::new(1, 0, data.len() as u64);
        let payload = Payload::CopyToDevice(req, Bytes::from(data.clone()));
        let frame = payload.into_frame(MessageHeader::new(MessageKind::CopyToDevice));

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("encode");
        let parsed = Frame::decode(&wire).expect("decode");

        match Payload::from_frame(&parsed).expect("payload") {
            Payload::CopyToDevice(_, inline) => prop_assert_eq!(inline.as_ref(), &data[..]),
            other => return Err(TestCaseError::fail(format!("wrong variant: {other:?}"))),
        }
    }
}

#[test]
fn error_payload_round_trip() {
    let payload = Payload::error(12, ErrorKind::OutOfMemory, -2, "device allocation failed");
    let frame = payload.clone().into_frame(MessageHeader::new(MessageKind::Error));

    let mut wire = Vec::new();
    frame.encode(&mut wire).expect("encode");
    let parsed = Frame::decode(&wire).expect("decode");

    assert_eq!(Payload::from_frame(&parsed).expect("payload"), payload);
}

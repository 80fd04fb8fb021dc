//! Frame type combining header and payload.
//!
//! A `Frame` is the unit of ring delivery: a 32-byte raw binary header
//! followed by a variable payload. This is a pure data holder (header +
//! bytes); typed access goes through `Payload::into_frame()` and
//! `Payload::from_frame()`.

use bytes::{BufMut, Bytes};

use crate::{
    MessageHeader,
    errors::{ProtocolError, Result},
};

/// Complete IDM frame (transport layer).
///
/// Layout on the wire:
/// `[MessageHeader: 32 bytes, raw binary] + [payload: variable bytes]`
///
/// Holds raw payload bytes, NOT the `Payload` enum: the broker's
/// receive path validates the header and routes on the kind before any
/// payload parsing happens.
///
/// # Invariants
///
/// - Size consistency: `payload.len()` MUST match
///   `header.payload_len()`. Enforced by [`Frame::new`] and verified by
///   [`Frame::decode`].
/// - Size limit: `payload.len()` MUST NOT exceed
///   [`MessageHeader::MAX_PAYLOAD_SIZE`] (one ring slot minus the
///   header). Violations are rejected during encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (32 bytes).
    pub header: MessageHeader,

    /// Raw payload bytes (typed struct plus optional inline data).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with automatic `payload_len` calculation.
    ///
    /// The header's `payload_len` field is set to the actual payload
    /// length, so a frame with mismatched header and payload sizes
    /// cannot be constructed through this path.
    #[must_use]
    pub fn new(mut header: MessageHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // INVARIANT: payload length fits in u32. Bytes is bounded by
        // isize::MAX and every payload accepted by encode() is bounded
        // by MAX_PAYLOAD_SIZE, far below u32::MAX.
        #[allow(clippy::expect_used)]
        let payload_len =
            u32::try_from(payload.len()).expect("invariant: payload length fits in u32");

        header.payload_len = payload_len.to_le_bytes();

        debug_assert_eq!(header.payload_len(), payload_len);

        Self { header, payload }
    }

    /// Total encoded size: header plus payload.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MessageHeader::SIZE + self.payload.len()
    }

    /// Encode the frame into a buffer.
    ///
    /// Writes `[header (32 bytes)] + [payload (variable)]`. This is the
    /// enforcement point for the per-slot payload limit: a frame that
    /// would not fit a ring slot is rejected here, before it reaches
    /// the transport.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    ///   [`MessageHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_len() as usize);

        if self.payload.len() > MessageHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MessageHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode a frame from wire bytes.
    ///
    /// Validates the header first, then reads exactly `payload_len`
    /// bytes. Trailing bytes (the unused remainder of a ring slot) are
    /// ignored. Returns raw payload bytes; use `Payload::from_frame()`
    /// for the typed view.
    ///
    /// # Errors
    ///
    /// - Any header validation error from [`MessageHeader::from_bytes`]
    /// - [`ProtocolError::FrameTruncated`] if fewer payload bytes are
    ///   present than the header claims
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = MessageHeader::from_bytes(bytes)?;

        let payload_len = header.payload_len() as usize;
        let total = MessageHeader::SIZE + payload_len;

        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_len,
                actual: bytes.len().saturating_sub(MessageHeader::SIZE),
            });
        }

        // INVARIANT: bytes.len() >= total was checked above, so this
        // slice cannot panic.
        #[allow(clippy::expect_used)]
        let payload = Bytes::copy_from_slice(
            bytes.get(MessageHeader::SIZE..total).expect("invariant: bounds checked above"),
        );

        debug_assert_eq!(payload.len(), payload_len);

        Ok(Self { header: *header, payload })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::MessageKind;

    impl Arbitrary for Frame {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (
                any::<MessageHeader>(),
                prop::collection::vec(any::<u8>(), 0..=MessageHeader::MAX_PAYLOAD_SIZE as usize),
            )
                .prop_map(|(header, payload_bytes)| Self::new(header, payload_bytes))
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in any::<Frame>()) {
            let mut wire = Vec::new();
            frame.encode(&mut wire).expect("should encode");

            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(&frame.header, &parsed.header);
            prop_assert_eq!(frame.payload, parsed.payload);
        }
    }

    #[test]
    fn frame_sets_payload_len() {
        let header = MessageHeader::new(MessageKind::Alloc);
        let frame = Frame::new(header, vec![1, 2, 3, 4]);
        assert_eq!(frame.header.payload_len(), 4);
        assert_eq!(frame.encoded_len(), MessageHeader::SIZE + 4);
    }

    #[test]
    fn trailing_slot_bytes_ignored() {
        let header = MessageHeader::new(MessageKind::Sync);
        let frame = Frame::new(header, vec![9u8; 8]);

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");
        wire.extend_from_slice(&[0xAA; 100]); // slack after the frame

        let parsed = Frame::decode(&wire).expect("should decode");
        assert_eq!(parsed.payload.as_ref(), &[9u8; 8]);
    }

    #[test]
    fn reject_truncated_frame() {
        let mut header = MessageHeader::new(MessageKind::Alloc);
        header.set_payload_len(100);

        // Only the header bytes, none of the claimed payload.
        let result = Frame::decode(&header.to_bytes());
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })));
    }

    #[test]
    fn reject_oversized_payload_at_encode() {
        let header = MessageHeader::new(MessageKind::CopyToDevice);
        let frame = Frame::new(header, vec![0u8; MessageHeader::MAX_PAYLOAD_SIZE as usize + 1]);

        let mut wire = Vec::new();
        assert!(matches!(
            frame.encode(&mut wire),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}

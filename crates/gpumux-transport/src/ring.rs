//! Single-producer/single-consumer slot ring over raw shared memory.
//!
//! Layout of one ring in its shared region:
//!
//! ```text
//! offset 0:  producer: u32   (advanced only by the writer)
//! offset 4:  consumer: u32   (advanced only by the reader)
//! offset 8:  padding to the 64-byte header boundary
//! offset 64: RING_CAPACITY slots of SLOT_SIZE bytes each
//! ```
//!
//! Counters are free-running: the ring is empty iff
//! `producer == consumer`, full iff `producer - consumer == capacity`
//! (wrapping arithmetic), and the slot index is the counter modulo
//! capacity. A u32 does not wrap within any realistic session, and
//! wrapping subtraction keeps the full/empty test correct even if it
//! did.
//!
//! # Memory ordering
//!
//! - Producer: write slot contents, release fence, then store
//!   `producer + 1` with release. The consumer can therefore never
//!   observe the new counter without the slot bytes behind it.
//! - Consumer: load `producer` with acquire, acquire fence before
//!   reading the slot, then store `consumer + 1` with release after
//!   the copy-out. The producer can therefore never observe the freed
//!   slot before the reader is done with it.
//!
//! Explicit fences are used even on TSO architectures.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering, fence};

/// Number of slots per ring.
///
/// A build-time constant, not a protocol parameter: 32 slots keeps a
/// full connection (two rings plus headers) within the segment-size
/// limits of the smallest supported shared-memory configuration.
pub const RING_CAPACITY: u32 = 32;

/// Bytes per slot: one page, enough for the worst-case framed message.
pub const SLOT_SIZE: usize = 4096;

/// Bytes reserved for the counters at the head of a ring region.
pub(crate) const RING_HEADER_SIZE: usize = 64;

/// Total bytes of one ring region.
pub(crate) const RING_BYTES: usize = RING_HEADER_SIZE + RING_CAPACITY as usize * SLOT_SIZE;

const _: () = assert!(RING_CAPACITY.is_power_of_two());
const _: () = assert!(SLOT_SIZE == gpumux_proto::MessageHeader::SIZE
    + gpumux_proto::MessageHeader::MAX_PAYLOAD_SIZE as usize);

/// One side's view of a ring living in shared memory.
///
/// The view does not own the memory; whoever created the mapping keeps
/// it alive for the view's lifetime.
pub(crate) struct RingView {
    base: NonNull<u8>,
}

// SAFETY: the ring protocol tolerates one producer and one consumer in
// different threads/processes; all cross-thread state is behind the
// atomic counters and the fences documented above.
unsafe impl Send for RingView {}

impl RingView {
    /// Create a view over a mapped ring region.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`RING_BYTES`] of readable and
    /// writable memory, 4-byte aligned, valid for the lifetime of the
    /// view. At most one `RingView` may push and at most one may pop
    /// on the same region at any time.
    pub unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }

    fn producer(&self) -> &AtomicU32 {
        // SAFETY: offset 0 of the region, 4-byte aligned per the
        // constructor contract.
        unsafe { &*self.base.as_ptr().cast::<AtomicU32>() }
    }

    fn consumer(&self) -> &AtomicU32 {
        // SAFETY: offset 4 of the region, within bounds and aligned.
        unsafe { &*self.base.as_ptr().add(4).cast::<AtomicU32>() }
    }

    fn slot_ptr(&self, index: u32) -> *mut u8 {
        debug_assert!(index < RING_CAPACITY);
        // SAFETY: index < RING_CAPACITY keeps the offset within the
        // region per the constructor contract.
        unsafe { self.base.as_ptr().add(RING_HEADER_SIZE + index as usize * SLOT_SIZE) }
    }

    /// Zero both counters. Server-role initialization only; racing
    /// this against a live peer loses frames.
    pub fn reset(&self) {
        self.producer().store(0, Ordering::SeqCst);
        self.consumer().store(0, Ordering::SeqCst);
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> u32 {
        let p = self.producer().load(Ordering::Acquire);
        let c = self.consumer().load(Ordering::Acquire);
        p.wrapping_sub(c)
    }

    /// Publish one frame (at most [`SLOT_SIZE`] bytes) into the ring.
    ///
    /// Returns `false` if the ring is full; the ring is unchanged in
    /// that case.
    pub fn try_push(&self, frame: &[u8]) -> bool {
        debug_assert!(frame.len() <= SLOT_SIZE);

        let p = self.producer().load(Ordering::Relaxed);
        let c = self.consumer().load(Ordering::Acquire);
        if p.wrapping_sub(c) == RING_CAPACITY {
            return false;
        }

        let slot = self.slot_ptr(p % RING_CAPACITY);
        // SAFETY: the slot is in bounds and, because the ring is not
        // full, not concurrently read by the consumer.
        unsafe {
            ptr::copy_nonoverlapping(frame.as_ptr(), slot, frame.len());
        }

        // Slot contents must be visible before the counter advance.
        fence(Ordering::Release);
        self.producer().store(p.wrapping_add(1), Ordering::Release);
        true
    }

    /// Dequeue one slot into `out`.
    ///
    /// Copies the whole slot; the caller parses and validates the
    /// frame afterwards. The consumer counter advances regardless of
    /// what the slot contained, so a malformed producer cannot wedge
    /// the ring. Returns `false` if the ring is empty.
    pub fn try_pop(&self, out: &mut [u8; SLOT_SIZE]) -> bool {
        let c = self.consumer().load(Ordering::Relaxed);
        let p = self.producer().load(Ordering::Acquire);
        if p == c {
            return false;
        }

        // Counter observation must precede the slot read.
        fence(Ordering::Acquire);

        let slot = self.slot_ptr(c % RING_CAPACITY);
        // SAFETY: the slot is in bounds and, because it is queued, not
        // concurrently written by the producer.
        unsafe {
            ptr::copy_nonoverlapping(slot, out.as_mut_ptr(), SLOT_SIZE);
        }

        // Release the slot back to the producer only after the copy.
        self.consumer().store(c.wrapping_add(1), Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SharedRegion;

    fn test_ring(region: &SharedRegion) -> RingView {
        // SAFETY: the region is RING_BYTES long, 64-byte aligned, and
        // each test uses a single producer and a single consumer.
        unsafe { RingView::new(region.base()) }
    }

    #[test]
    fn empty_ring_pops_nothing() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let ring = test_ring(&region);

        let mut out = [0u8; SLOT_SIZE];
        assert!(!ring.try_pop(&mut out));
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn push_pop_round_trip() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let ring = test_ring(&region);

        assert!(ring.try_push(&[7u8; 100]));
        assert_eq!(ring.len(), 1);

        let mut out = [0u8; SLOT_SIZE];
        assert!(ring.try_pop(&mut out));
        assert_eq!(&out[..100], &[7u8; 100]);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn fifo_order_preserved() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let ring = test_ring(&region);

        for i in 0..RING_CAPACITY {
            assert!(ring.try_push(&[i as u8; 16]));
        }

        let mut out = [0u8; SLOT_SIZE];
        for i in 0..RING_CAPACITY {
            assert!(ring.try_pop(&mut out));
            assert_eq!(out[0], i as u8);
        }
    }

    #[test]
    fn full_ring_rejects_push() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let ring = test_ring(&region);

        for _ in 0..RING_CAPACITY {
            assert!(ring.try_push(&[0u8; 8]));
        }
        assert!(!ring.try_push(&[0u8; 8]));

        // Draining one slot frees exactly one push.
        let mut out = [0u8; SLOT_SIZE];
        assert!(ring.try_pop(&mut out));
        assert!(ring.try_push(&[0u8; 8]));
        assert!(!ring.try_push(&[0u8; 8]));
    }

    #[test]
    fn counters_wrap_safely() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let ring = test_ring(&region);

        // Cycle several capacities to walk the counters well past the
        // slot array.
        let mut out = [0u8; SLOT_SIZE];
        for round in 0u32..(RING_CAPACITY * 5) {
            assert!(ring.try_push(&round.to_le_bytes()));
            assert!(ring.try_pop(&mut out));
            assert_eq!(u32::from_le_bytes([out[0], out[1], out[2], out[3]]), round);
        }
    }

    #[test]
    fn reset_clears_counters() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let ring = test_ring(&region);

        for _ in 0..5 {
            assert!(ring.try_push(&[0u8; 8]));
        }
        ring.reset();
        assert_eq!(ring.len(), 0);

        let mut out = [0u8; SLOT_SIZE];
        assert!(!ring.try_pop(&mut out));
    }

    #[test]
    fn concurrent_producer_consumer() {
        let region = SharedRegion::zeroed(RING_BYTES);
        let producer = test_ring(&region);
        let consumer = test_ring(&region);

        const FRAMES: u32 = 10_000;

        std::thread::scope(|s| {
            s.spawn(move || {
                for i in 0..FRAMES {
                    while !producer.try_push(&i.to_le_bytes()) {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut out = [0u8; SLOT_SIZE];
            let mut expected = 0u32;
            while expected < FRAMES {
                if consumer.try_pop(&mut out) {
                    let got = u32::from_le_bytes([out[0], out[1], out[2], out[3]]);
                    assert_eq!(got, expected);
                    expected += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });
    }
}

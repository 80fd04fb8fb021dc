//! Fuzz target for Payload::decode
//!
//! This fuzzer tests typed payload parsing with:
//! - Truncated or oversized payload structs
//! - Inline-length fields disagreeing with the attached bytes
//! - Kind confusion (the same bytes parsed as every kind)
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use gpumux_proto::{MessageKind, Payload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The kind table is closed; try the same bytes against every kind
    // to exercise each struct layout.
    let kinds = [
        MessageKind::Alloc,
        MessageKind::Free,
        MessageKind::CopyToDevice,
        MessageKind::CopyFromDevice,
        MessageKind::CopyOnDevice,
        MessageKind::Memset,
        MessageKind::Sync,
        MessageKind::Info,
        MessageKind::Ok,
        MessageKind::Error,
    ];

    for kind in kinds {
        if let Ok(payload) = Payload::decode(kind, data) {
            // Anything that parsed must re-encode without panicking.
            let mut buf = Vec::new();
            payload.encode(&mut buf);
        }
    }
});

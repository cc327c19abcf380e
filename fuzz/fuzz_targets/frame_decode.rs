//! Fuzz target for Frame::decode
//!
//! Feeds arbitrary bytes to the push-channel frame parser.
//!
//! # Invariants
//!
//! - Decoding never panics; bad input is an `Err`
//! - Input over `MAX_FRAME_LEN` is always rejected
//! - A decoded frame re-encodes, and the encoding decodes to the same kind

#![no_main]

use libfuzzer_sys::fuzz_target;
use murmur_proto::{Frame, MAX_FRAME_LEN};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(_) => return,
    };
    assert!(text.len() <= MAX_FRAME_LEN, "oversized frame accepted");

    let encoded = frame.encode().expect("decoded frame must re-encode");
    if encoded.len() <= MAX_FRAME_LEN {
        let again = Frame::decode(&encoded).expect("encoded frame must decode");
        assert_eq!(again.kind(), frame.kind());
        assert_eq!(again.conversation_id(), frame.conversation_id());
    }
});

//! Fuzz target for the real-time frame codec.
//!
//! Arbitrary text is decoded as both client and server frames. Decoding
//! must never panic, and any frame that decodes must survive a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use showroom_proto::{ClientFrame, ServerFrame};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(frame) = ServerFrame::decode(text) {
        let encoded = frame.encode().expect("decoded frame must encode");
        assert_eq!(ServerFrame::decode(&encoded).ok(), Some(frame));
    }
    if let Ok(frame) = ClientFrame::decode(text) {
        let encoded = frame.encode().expect("decoded frame must encode");
        assert_eq!(ClientFrame::decode(&encoded).ok(), Some(frame));
    }
});

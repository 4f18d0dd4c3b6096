//! Fuzz target for helper message decoding.
//!
//! Arbitrary frame bodies must decode to a message or an error, never panic
//! or allocate beyond the frame limit.

#![no_main]

use libfuzzer_sys::fuzz_target;
use netmon_helper::ipc::MessageCodec;

fuzz_target!(|data: &[u8]| {
    let codec = MessageCodec::default();
    if let Ok(message) = codec.decode(data) {
        // Accepted messages must encode again without panicking
        let _ = codec.encode(&message);
    }
});

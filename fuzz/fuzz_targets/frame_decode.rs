//! Random-input fuzzer for the wire decoder.
//!
//! Arbitrary bytes must never panic the header check, the frame split, or the
//! CBOR payload decode. Anything that does decode must re-encode to the same
//! frame.

#![no_main]

use hostbeat_proto::{Frame, Payload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut wire = Vec::with_capacity(frame.encoded_len());
    if frame.encode(&mut wire).is_ok() {
        let again = Frame::decode(&wire).expect("re-encoded frame must decode");
        assert_eq!(again, frame);
    }

    let Ok(payload) = Payload::from_frame(&frame) else {
        return;
    };
    assert_eq!(Some(payload.opcode()), frame.header.opcode_enum());
});

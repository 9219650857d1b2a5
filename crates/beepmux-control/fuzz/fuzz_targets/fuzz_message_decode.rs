//! Fuzz target for management record decoding.
//!
//! Tests that arbitrary byte sequences don't cause panics when parsed as
//! management records via the bincode codec, and that whatever does decode
//! can be interpreted by the typed extractors without panicking.

#![no_main]

use beepmux_control::{BincodeCodec, Codec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = BincodeCodec::new();

    if let Ok(message) = codec.decode_message(data) {
        let _ = message.kind();
        let _ = message.clone().into_greeting();
        let _ = codec.encode_message(&message);
    }
});

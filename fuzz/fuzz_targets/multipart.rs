#![no_main]

use libfuzzer_sys::fuzz_target;
use zkw_core::header::classify;
use zkw_core::Message;
use zkw_transport::tcp::{decode_multipart, encode_multipart};

fuzz_target!(|data: &[u8]| {
    // Tag classification and wire decoding must never panic on any input
    let _ = classify(data);

    if let Ok(Some((frames, used))) = decode_multipart(data) {
        assert!(used <= data.len());

        // A decoded frame set re-encodes to the bytes it was read from
        let encoded = encode_multipart(&frames).expect("decoded frame set is within limits");
        assert_eq!(&encoded[..], &data[..used]);

        let _ = Message::from_router_frames(frames);
    }
});

#![no_main]

use keyward_custody::transport::{decode_text, encode_text};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(artifact) = decode_text(text) {
        // Anything accepted re-encodes to text that decodes identically
        let encoded = encode_text(&artifact).unwrap();
        let decoded = decode_text(&encoded.to_file_contents()).unwrap();
        assert_eq!(artifact, decoded);
    }
});

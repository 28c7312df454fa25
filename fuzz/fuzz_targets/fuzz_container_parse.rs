#![no_main]

use keyward_core::{parse_unencrypted, ErrorKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Never decrypts, so no KDF runs on attacker-chosen cost parameters
    match parse_unencrypted(data) {
        Ok(decoded) => {
            assert_eq!(
                decoded.sections.len() + decoded.sealed_tags.len(),
                decoded.header.section_count as usize
            );
            for section in &decoded.sections {
                assert!(!section.encrypted);
                assert!(!section.tag.is_empty());
            }
        }
        Err(e) => assert!(matches!(e.kind(), ErrorKind::Format | ErrorKind::Validation)),
    }
});

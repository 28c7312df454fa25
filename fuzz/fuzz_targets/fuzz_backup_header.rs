#![no_main]

use keyward_core::{BackupHeader, HEADER_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = BackupHeader::from_bytes(data) {
        assert!(data.len() >= HEADER_SIZE);

        // Round-trip
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..], &data[..HEADER_SIZE]);
        let header2 = BackupHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.algorithms, header2.algorithms);
        assert_eq!(header.section_count, header2.section_count);
    }
});

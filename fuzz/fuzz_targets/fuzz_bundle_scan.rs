//! Fuzzes the streaming bundle layout scanner.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_bundle_scan
#![no_main]
use libfuzzer_sys::fuzz_target;
use updatekit_software_update::wire::{read_range, scan_bundle};
use updatekit_stream::MemoryReader;

fuzz_target!(|data: &[u8]| {
    // Every range the scanner reports must be readable from the same bytes.
    let mut reader = MemoryReader::new(data.to_vec());
    if let Ok(layout) = scan_bundle(&mut reader) {
        for range in layout.target_payloads.values() {
            assert!(read_range(&mut reader, range).is_ok());
        }
    }
});

//! Fuzzes decoding of a stored on-device manifest.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_manifest_decode
#![no_main]
use libfuzzer_sys::fuzz_target;
use updatekit_software_update::ManifestAccessor;

fuzz_target!(|data: &[u8]| {
    if let Ok(manifest) = ManifestAccessor::decode(data) {
        let _ = manifest.version();
        let _ = manifest.target_files().len();
        let _ = manifest.encode();
    }
});

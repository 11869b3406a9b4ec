//! Fuzzes the full verification chain on arbitrary bundle bytes.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_bundle_self_verify
#![no_main]
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use parking_lot::Mutex;
use updatekit_software_update::{
    BundleAccessorConfig, InMemoryBackend, MemoryOpenableReader, UpdateBundleAccessor,
};

fuzz_target!(|data: &[u8]| {
    // Errors are expected, panics are not.
    let backend = Arc::new(Mutex::new(InMemoryBackend::new()));
    let config = BundleAccessorConfig {
        self_verification: true,
        ..BundleAccessorConfig::default()
    };
    let mut accessor = UpdateBundleAccessor::new(
        Box::new(MemoryOpenableReader::new(data.to_vec())),
        backend,
        config,
    );
    if accessor.open_and_verify().is_ok() {
        let _ = accessor.get_manifest();
    }
    let _ = accessor.close();
});

//! Property-based tests for blob store invariants

mod common;

use std::sync::Arc;

use common::{Fixture, PARTITION_SIZE};
use proptest::prelude::*;
use updatekit_blob_store::prelude::*;
use updatekit_errors::ErrorKind;
use updatekit_stream::Writer;
use updatekit_test_helpers::prelude::*;

fn fail(e: impl std::fmt::Display) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_trip_any_chunking(
        len in 1usize..=PARTITION_SIZE,
        seed in any::<u8>(),
        sizes in proptest::collection::vec(1usize..40, 1..8),
    ) {
        let fx = Fixture::new().map_err(fail)?;
        let data = pattern_bytes(len, seed);
        let mut writer = BlobWriter::new(Arc::clone(&fx.store));
        writer.open().map_err(fail)?;
        for chunk in chunked(&data, &sizes) {
            writer.write(chunk).map_err(fail)?;
        }
        writer.close().map_err(fail)?;
        prop_assert_eq!(fx.read_blob().map_err(fail)?, data);
    }

    #[test]
    fn prop_deferred_round_trip_any_chunking(
        len in 1usize..=PARTITION_SIZE,
        seed in any::<u8>(),
        sizes in proptest::collection::vec(1usize..=48, 1..8),
    ) {
        let fx = Fixture::new().map_err(fail)?;
        let data = pattern_bytes(len, seed);
        let mut writer = DeferredBlobWriter::new(Arc::clone(&fx.store));
        writer.open().map_err(fail)?;
        for chunk in chunked(&data, &sizes) {
            match writer.add_to_write_buffer(chunk) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::ResourceExhausted => {
                    writer.flush().map_err(fail)?;
                    writer.add_to_write_buffer(chunk).map_err(fail)?;
                }
                Err(e) => return Err(fail(e)),
            }
        }
        writer.close().map_err(fail)?;
        prop_assert_eq!(fx.read_blob().map_err(fail)?, data);
    }

    #[test]
    fn prop_write_failure_is_sticky(
        good_writes in 0usize..4,
        later in proptest::collection::vec(1usize..64, 1..5),
    ) {
        let fx = Fixture::new().map_err(fail)?;
        let mut writer = BlobWriter::new(Arc::clone(&fx.store));
        writer.open().map_err(fail)?;
        fx.partition.lock().inject_write_failure_after(good_writes);

        // Keep writing whole chunks until the injected failure hits.
        let mut failed = false;
        for _ in 0..=good_writes {
            if let Err(e) = writer.write(&[0u8; 16]) {
                prop_assert_eq!(e.kind(), ErrorKind::DataLoss);
                failed = true;
                break;
            }
        }
        prop_assert!(failed);
        fx.partition.lock().clear_faults();

        for len in later {
            let err = writer.write(&vec![1u8; len]).err().map(|e| e.kind());
            prop_assert_eq!(err, Some(ErrorKind::DataLoss));
        }
        prop_assert!(!fx.store.has_data());
    }
}

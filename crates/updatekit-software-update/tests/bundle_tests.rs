//! Integration tests for bundle verification and gated access

mod common;

use std::sync::Arc;

use common::*;
use prost::Message;
use updatekit_errors::ErrorKind;
use updatekit_software_update::prelude::*;
use updatekit_software_update::proto::UpdateBundle;
use updatekit_stream::Reader;
use updatekit_test_helpers::prelude::*;

fn read_payload(accessor: &UpdateBundleAccessor, name: &str) -> updatekit_errors::Result<Vec<u8>> {
    let mut reader = accessor.get_target_payload(name)?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

mod blob_staged_tests {
    use super::*;

    #[test]
    fn test_verify_and_read_from_blob_store() -> TestResult {
        let key = dev_key(1)?;
        let root = dev_root(&key)?;
        let bundle = two_file_bundle(1, &key).root(root.clone()).build_bytes()?;

        let store = staging_store()?;
        stage(&store, &bundle)?;
        assert_eq!(store.readable_data_bytes(), bundle.len());

        let backend = backend_with_root(&root);
        let dyn_backend: Arc<parking_lot::Mutex<dyn BundledUpdateBackend>> = backend.clone();
        let mut accessor = UpdateBundleAccessor::new(
            Box::new(BlobStoreOpenableReader::new(Arc::clone(&store))),
            dyn_backend,
            BundleAccessorConfig::default(),
        );
        accessor.open_and_verify()?;

        assert_eq!(read_payload(&accessor, "file1")?, FILE1);
        assert_eq!(read_payload(&accessor, "file2")?, FILE2);
        assert_error_kind!(accessor.get_target_payload("nonexistent"), ErrorKind::NotFound);
        assert_eq!(accessor.get_total_payload_size()?, (FILE1.len() + FILE2.len()) as u64);
        assert_eq!(accessor.trusted_root_version(), Some(1));
        Ok(())
    }

    #[test]
    fn test_blob_in_use_by_writer_is_unavailable() -> TestResult {
        let key = dev_key(1)?;
        let root = dev_root(&key)?;
        let store = staging_store()?;
        stage(&store, &two_file_bundle(1, &key).build_bytes()?)?;

        let mut writer = updatekit_blob_store::BlobWriter::new(Arc::clone(&store));
        writer.open()?;

        let backend = backend_with_root(&root);
        let dyn_backend: Arc<parking_lot::Mutex<dyn BundledUpdateBackend>> = backend.clone();
        let mut accessor = UpdateBundleAccessor::new(
            Box::new(BlobStoreOpenableReader::new(Arc::clone(&store))),
            dyn_backend,
            BundleAccessorConfig::default(),
        );
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unavailable);
        assert!(!accessor.is_open());
        writer.close()?;
        Ok(())
    }
}

mod gating_tests {
    use super::*;

    #[test]
    fn test_accessors_fail_before_verification() -> TestResult {
        let key = dev_key(1)?;
        let root = dev_root(&key)?;
        let backend = backend_with_root(&root);
        let accessor = memory_accessor(
            two_file_bundle(1, &key).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );

        assert_error_kind!(accessor.get_manifest(), ErrorKind::FailedPrecondition);
        assert_error_kind!(accessor.get_target_payload("file1"), ErrorKind::FailedPrecondition);
        assert_error_kind!(accessor.get_total_payload_size(), ErrorKind::FailedPrecondition);
        assert_error_kind!(accessor.persist_manifest(), ErrorKind::FailedPrecondition);
        Ok(())
    }

    #[test]
    fn test_accessors_fail_after_close() -> TestResult {
        let key = dev_key(1)?;
        let root = dev_root(&key)?;
        let backend = backend_with_root(&root);
        let mut accessor = memory_accessor(
            two_file_bundle(1, &key).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );
        accessor.open_and_verify()?;
        accessor.close()?;

        assert!(!accessor.is_verified());
        assert_error_kind!(accessor.get_target_payload("file1"), ErrorKind::FailedPrecondition);
        Ok(())
    }

    #[test]
    fn test_failed_verification_exposes_nothing() -> TestResult {
        let key = dev_key(1)?;
        let other = dev_key(2)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let mut accessor = memory_accessor(
            two_file_bundle(1, &other).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );

        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        assert!(!accessor.is_open());
        assert_error_kind!(accessor.get_target_payload("file1"), ErrorKind::FailedPrecondition);
        Ok(())
    }
}

mod trust_tests {
    use super::*;

    #[test]
    fn test_missing_device_root_is_unauthenticated() -> TestResult {
        let key = dev_key(1)?;
        let backend = Arc::new(parking_lot::Mutex::new(InMemoryBackend::new()));
        let mut accessor = memory_accessor(
            two_file_bundle(1, &key).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_unsigned_targets_rejected() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let bundle = UpdateBundleBuilder::new(1).target("file1", FILE1.to_vec()).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_root_rotation_is_persisted() -> TestResult {
        let old_key = dev_key(1)?;
        let new_key = dev_key(2)?;
        let backend = backend_with_root(&dev_root(&old_key)?);

        let rotated = signed_root(2, &new_key, &new_key, &[old_key.clone(), new_key.clone()])?;
        let bundle = two_file_bundle(3, &new_key).root(rotated.clone()).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());
        accessor.open_and_verify()?;

        assert_eq!(accessor.trusted_root_version(), Some(2));
        let backend = backend.lock();
        assert_eq!(backend.root_persist_count(), 1);
        assert_eq!(backend.trusted_root(), Some(rotated.encode_to_vec().as_slice()));
        Ok(())
    }

    #[test]
    fn test_rotation_needs_old_root_signature() -> TestResult {
        let old_key = dev_key(1)?;
        let new_key = dev_key(2)?;
        let backend = backend_with_root(&dev_root(&old_key)?);

        let rotated = signed_root(2, &new_key, &new_key, std::slice::from_ref(&new_key))?;
        let bundle = two_file_bundle(1, &new_key).root(rotated).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());

        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        assert_eq!(backend.lock().root_persist_count(), 0);
        Ok(())
    }

    #[test]
    fn test_root_rollback_rejected_and_not_persisted() -> TestResult {
        let key_a = dev_key(1)?;
        let key_b = dev_key(2)?;
        let trusted = signed_root(2, &key_b, &key_b, std::slice::from_ref(&key_b))?;
        let backend = backend_with_root(&trusted);

        let older = signed_root(1, &key_a, &key_a, &[key_a.clone(), key_b.clone()])?;
        let bundle = two_file_bundle(1, &key_a).root(older).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());

        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        let backend = backend.lock();
        assert_eq!(backend.root_persist_count(), 0);
        assert_eq!(backend.trusted_root(), Some(trusted.encode_to_vec().as_slice()));
        Ok(())
    }

    #[test]
    fn test_rotated_root_kept_when_targets_fail() -> TestResult {
        let old_key = dev_key(1)?;
        let new_key = dev_key(2)?;
        let stranger = dev_key(3)?;
        let backend = backend_with_root(&dev_root(&old_key)?);

        let rotated = signed_root(2, &new_key, &new_key, &[old_key, new_key.clone()])?;
        let bundle = two_file_bundle(1, &stranger).root(rotated.clone()).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());

        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        let backend = backend.lock();
        assert_eq!(backend.root_persist_count(), 1);
        assert_eq!(backend.trusted_root(), Some(rotated.encode_to_vec().as_slice()));
        Ok(())
    }

    #[test]
    fn test_targets_threshold_of_two() -> TestResult {
        let key_a = dev_key(1)?;
        let key_b = dev_key(2)?;
        let root = RootMetadataBuilder::new(1)
            .root_key(key_a.public_key_sec1())
            .targets_key(key_a.public_key_sec1())
            .targets_key(key_b.public_key_sec1())
            .targets_threshold(2)
            .sign(std::slice::from_ref(&key_a))?;
        let backend = backend_with_root(&root);

        let one = two_file_bundle(1, &key_a).build_bytes()?;
        let mut accessor = memory_accessor(one, &backend, BundleAccessorConfig::default());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);

        // The same key twice is still one signature.
        let doubled = two_file_bundle(1, &key_a).sign_with(key_a.clone()).build_bytes()?;
        let mut accessor = memory_accessor(doubled, &backend, BundleAccessorConfig::default());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);

        let both = two_file_bundle(1, &key_a).sign_with(key_b).build_bytes()?;
        let mut accessor = memory_accessor(both, &backend, BundleAccessorConfig::default());
        accessor.open_and_verify()?;
        Ok(())
    }
}

mod anti_rollback_tests {
    use super::*;

    #[test]
    fn test_older_targets_rejected() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        backend
            .lock()
            .set_manifest(Some(two_file_bundle(5, &key).device_manifest()?));

        let mut accessor = memory_accessor(
            two_file_bundle(4, &key).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_same_version_accepted() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        backend
            .lock()
            .set_manifest(Some(two_file_bundle(5, &key).device_manifest()?));

        let mut accessor = memory_accessor(
            two_file_bundle(5, &key).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );
        accessor.open_and_verify()?;
        Ok(())
    }

    #[test]
    fn test_garbage_device_manifest_is_ignored() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        backend.lock().set_manifest(Some(vec![0xFF, 0xFF, 0xFF]));

        let mut accessor = memory_accessor(
            two_file_bundle(1, &key).build_bytes()?,
            &backend,
            BundleAccessorConfig::default(),
        );
        accessor.open_and_verify()?;
        Ok(())
    }
}

mod payload_tests {
    use super::*;

    fn tampered(key: &updatekit_crypto::SigningKeyPair, replacement: &[u8]) -> updatekit_errors::Result<Vec<u8>> {
        let mut bundle: UpdateBundle = two_file_bundle(1, key).build()?;
        bundle.target_payloads.insert("file1".to_string(), replacement.to_vec());
        Ok(bundle.encode_to_vec())
    }

    #[test]
    fn test_hash_mismatch_rejected() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let mut accessor = memory_accessor(
            tampered(&key, b"file 1 CONTENT")?,
            &backend,
            BundleAccessorConfig::default(),
        );
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_length_mismatch_rejected() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let mut accessor = memory_accessor(
            tampered(&key, b"file 1 content, longer")?,
            &backend,
            BundleAccessorConfig::default(),
        );
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_oversized_payload_is_out_of_range() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let config = BundleAccessorConfig {
            max_target_payload_size: 8,
            ..BundleAccessorConfig::default()
        };
        let mut accessor = memory_accessor(two_file_bundle(1, &key).build_bytes()?, &backend, config);
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::OutOfRange);
        Ok(())
    }

    #[test]
    fn test_large_payload_streams_through_hash() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let payload = pattern_bytes(5000, 9);
        let bundle = UpdateBundleBuilder::new(1)
            .target("big", payload.clone())
            .sign_with(key)
            .build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());
        accessor.open_and_verify()?;
        assert_eq!(read_payload(&accessor, "big")?, payload);
        Ok(())
    }
}

mod personalization_tests {
    use super::*;

    fn provisioned(key: &updatekit_crypto::SigningKeyPair) -> updatekit_errors::Result<Arc<parking_lot::Mutex<InMemoryBackend>>> {
        let backend = backend_with_root(&dev_root(key)?);
        backend
            .lock()
            .set_manifest(Some(two_file_bundle(1, key).device_manifest()?));
        Ok(backend)
    }

    fn personalized(key: &updatekit_crypto::SigningKeyPair, file1: &[u8]) -> updatekit_errors::Result<Vec<u8>> {
        UpdateBundleBuilder::new(2)
            .personalized_out_target("file1", file1.to_vec())
            .target("file2", b"new file 2".to_vec())
            .sign_with(key.clone())
            .build_bytes()
    }

    #[test]
    fn test_personalized_out_target_matches_device() -> TestResult {
        let key = dev_key(1)?;
        let backend = provisioned(&key)?;
        let mut accessor = memory_accessor(personalized(&key, FILE1)?, &backend, BundleAccessorConfig::default());
        accessor.open_and_verify()?;

        assert_error_kind!(accessor.get_target_payload("file1"), ErrorKind::NotFound);
        assert_eq!(read_payload(&accessor, "file2")?, b"new file 2");
        assert_eq!(accessor.get_total_payload_size()?, 10);
        assert!(backend.lock().events().contains(&"verify_target_file"));
        assert!(accessor.is_personalized_out("file1")?);
        assert!(!accessor.is_personalized_out("file2")?);

        accessor.close()?;
        assert_error_kind!(accessor.is_personalized_out("file1"), ErrorKind::FailedPrecondition);
        Ok(())
    }

    #[test]
    fn test_personalized_out_measurement_mismatch() -> TestResult {
        let key = dev_key(1)?;
        let backend = provisioned(&key)?;
        let mut accessor = memory_accessor(
            personalized(&key, b"something else")?,
            &backend,
            BundleAccessorConfig::default(),
        );
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_personalization_disabled_rejects_missing_payload() -> TestResult {
        let key = dev_key(1)?;
        let backend = provisioned(&key)?;
        let config = BundleAccessorConfig {
            with_personalization: false,
            ..BundleAccessorConfig::default()
        };
        let mut accessor = memory_accessor(personalized(&key, FILE1)?, &backend, config);
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_backend_can_veto_personalized_out_target() -> TestResult {
        let key = dev_key(1)?;
        let backend = provisioned(&key)?;
        backend.lock().set_failing(BackendHook::VerifyTargetFile, true);
        let mut accessor = memory_accessor(personalized(&key, FILE1)?, &backend, BundleAccessorConfig::default());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }

    #[test]
    fn test_no_device_manifest_rejects_personalized_out() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let mut accessor = memory_accessor(personalized(&key, FILE1)?, &backend, BundleAccessorConfig::default());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        Ok(())
    }
}

mod manifest_tests {
    use super::*;

    #[test]
    fn test_manifest_carries_user_manifest() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let bundle = two_file_bundle(7, &key).user_manifest(b"product=demo".to_vec()).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::default());
        accessor.open_and_verify()?;

        let manifest = accessor.get_manifest()?;
        assert_eq!(manifest.version(), 7);
        assert_eq!(manifest.user_manifest(), Some(&b"product=demo"[..]));
        assert_eq!(manifest.target_files().len(), 3);
        // user_manifest is not a payload to apply
        assert_eq!(accessor.get_total_payload_size()?, (FILE1.len() + FILE2.len()) as u64);
        Ok(())
    }

    #[test]
    fn test_persist_manifest_replaces_device_manifest() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        backend
            .lock()
            .set_manifest(Some(two_file_bundle(1, &key).device_manifest()?));

        let builder = two_file_bundle(2, &key).user_manifest(b"v2".to_vec());
        let mut accessor = memory_accessor(builder.build_bytes()?, &backend, BundleAccessorConfig::default());
        accessor.open_and_verify()?;
        accessor.persist_manifest()?;

        let stored = must_some(backend.lock().manifest_accessor(), "manifest stored");
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.user_manifest(), Some(&b"v2"[..]));
        assert_eq!(backend.lock().manifest(), Some(builder.device_manifest()?.as_slice()));
        Ok(())
    }
}

mod mode_tests {
    use super::*;

    #[test]
    fn test_self_verification_accepts_unsigned_bundle() -> TestResult {
        let backend = Arc::new(parking_lot::Mutex::new(InMemoryBackend::new()));
        let bundle = UpdateBundleBuilder::new(1).target("file1", FILE1.to_vec()).build_bytes()?;
        let mut accessor = memory_accessor(bundle, &backend, BundleAccessorConfig::self_verifying());
        accessor.open_and_verify()?;
        assert_eq!(read_payload(&accessor, "file1")?, FILE1);
        Ok(())
    }

    #[test]
    fn test_self_verification_still_checks_hashes() -> TestResult {
        let key = dev_key(1)?;
        let mut bundle: UpdateBundle = two_file_bundle(1, &key).root(dev_root(&key)?).build()?;
        bundle.target_payloads.insert("file2".to_string(), b"file 2 CONTENT".to_vec());
        let backend = Arc::new(parking_lot::Mutex::new(InMemoryBackend::new()));
        let mut accessor = memory_accessor(bundle.encode_to_vec(), &backend, BundleAccessorConfig::self_verifying());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::Unauthenticated);
        assert_eq!(backend.lock().root_persist_count(), 0);
        Ok(())
    }

    #[test]
    fn test_disabled_verification_accepts_anything() -> TestResult {
        let key = dev_key(1)?;
        let stranger = dev_key(2)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let config = BundleAccessorConfig {
            disable_verification: true,
            ..BundleAccessorConfig::default()
        };
        let mut accessor = memory_accessor(two_file_bundle(1, &stranger).build_bytes()?, &backend, config);
        accessor.open_and_verify()?;
        assert_eq!(read_payload(&accessor, "file2")?, FILE2);
        Ok(())
    }

    #[test]
    fn test_truncated_bundle_is_data_loss() -> TestResult {
        let key = dev_key(1)?;
        let backend = backend_with_root(&dev_root(&key)?);
        let mut bytes = two_file_bundle(1, &key).build_bytes()?;
        bytes.truncate(bytes.len() - 3);
        let mut accessor = memory_accessor(bytes, &backend, BundleAccessorConfig::default());
        assert_error_kind!(accessor.open_and_verify(), ErrorKind::DataLoss);
        Ok(())
    }
}

//! `bundlectl bundle`
//!
//! - `bundle build` assembles and signs a bundle from target files
//! - `bundle inspect` decodes a bundle and lists its metadata, unverified
//! - `bundle verify` runs the on-device verification chain against a
//!   trusted root and optional installed manifest

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::*;
use parking_lot::Mutex;
use prost::Message;
use serde::Serialize;
use tracing::{info, warn};
use updatekit_crypto::sha256;
use updatekit_software_update::proto::{
    RootMetadata, Signature, SignedRootMetadata, TOP_LEVEL_TARGETS_NAME, TargetsMetadata,
    UpdateBundle,
};
use updatekit_software_update::{
    BundleAccessorConfig, BundledUpdateBackend, InMemoryBackend, MemoryOpenableReader,
    UpdateBundleAccessor, UpdateBundleBuilder,
};

use crate::commands::BundleCommands;
use crate::error::CliError;
use crate::keys::{read_input, read_signing_keys};
use crate::output;

/// Execute bundle command
pub fn execute(cmd: &BundleCommands, json: bool) -> Result<(), CliError> {
    match cmd {
        BundleCommands::Build {
            targets_keys,
            version,
            targets,
            personalized_out,
            root,
            user_manifest,
            out,
            device_manifest_out,
        } => {
            let args = BuildArgs {
                targets_keys,
                version: *version,
                targets,
                personalized_out,
                root: root.as_deref(),
                user_manifest: user_manifest.as_deref(),
                device_manifest_out: device_manifest_out.as_deref(),
            };
            build(&args, out, json)
        }
        BundleCommands::Inspect { bundle } => inspect(bundle, json),
        BundleCommands::Verify {
            bundle,
            root,
            manifest,
            self_verify,
            no_personalization,
            max_payload_size,
        } => {
            let config = BundleAccessorConfig {
                self_verification: *self_verify,
                with_personalization: !*no_personalization,
                max_target_payload_size: *max_payload_size,
                ..BundleAccessorConfig::default()
            };
            verify(bundle, root.as_deref(), manifest.as_deref(), config, json)
        }
    }
}

struct BuildArgs<'a> {
    targets_keys: &'a [PathBuf],
    version: u32,
    targets: &'a [(String, PathBuf)],
    personalized_out: &'a [(String, PathBuf)],
    root: Option<&'a Path>,
    user_manifest: Option<&'a Path>,
    device_manifest_out: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
struct BuildOutput {
    bundle_file: String,
    size: usize,
    version: u32,
    targets: usize,
    signatures: usize,
    carries_root: bool,
}

fn build(args: &BuildArgs<'_>, out: &Path, json: bool) -> Result<(), CliError> {
    if args.targets.is_empty() && args.personalized_out.is_empty() && args.user_manifest.is_none()
    {
        return Err(CliError::InvalidInput("a bundle needs at least one target".to_string()));
    }
    let signers = read_signing_keys(args.targets_keys)?;
    if signers.is_empty() {
        warn!("No --targets-key given; targets metadata will be unsigned");
    }

    let mut builder = UpdateBundleBuilder::new(args.version);
    if let Some(path) = args.root {
        let bytes = read_input(path)?;
        let root = SignedRootMetadata::decode(bytes.as_slice()).map_err(|e| {
            CliError::InvalidInput(format!("{} is not signed root metadata: {e}", path.display()))
        })?;
        builder = builder.root(root);
    }
    for (name, path) in args.targets {
        builder = builder.target(name.clone(), read_input(path)?);
    }
    for (name, path) in args.personalized_out {
        builder = builder.personalized_out_target(name.clone(), read_input(path)?);
    }
    if let Some(path) = args.user_manifest {
        builder = builder.user_manifest(read_input(path)?);
    }
    let signature_count = signers.len();
    for signer in signers {
        builder = builder.sign_with(signer);
    }

    let bytes = builder.build_bytes()?;
    fs::write(out, &bytes)?;
    if let Some(path) = args.device_manifest_out {
        fs::write(path, builder.device_manifest()?)?;
    }
    info!(path = %out.display(), bytes = bytes.len(), version = args.version, "Wrote update bundle");

    let summary = BuildOutput {
        bundle_file: out.display().to_string(),
        size: bytes.len(),
        version: args.version,
        targets: builder.targets_metadata().target_files.len(),
        signatures: signature_count,
        carries_root: args.root.is_some(),
    };
    if json {
        return output::print_success_json(&summary);
    }
    println!("{} {}", "Wrote bundle".green().bold(), summary.bundle_file);
    output::field("Size", format!("{} bytes", summary.size));
    output::field("Targets version", summary.version);
    output::field("Targets", summary.targets);
    output::field("Signatures", summary.signatures);
    output::field("Carries root", summary.carries_root);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RootSummary {
    version: u32,
    key_ids: Vec<String>,
    root_threshold: u32,
    targets_threshold: u32,
    signed_by: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TargetSummary {
    name: String,
    length: u64,
    sha256: Option<String>,
    in_bundle: bool,
}

#[derive(Debug, Serialize)]
struct TargetsSummary {
    version: u32,
    signed_by: Vec<String>,
    targets: Vec<TargetSummary>,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    size: usize,
    root: Option<RootSummary>,
    targets: Option<TargetsSummary>,
    payload_bytes: usize,
}

fn signer_ids(signatures: &[Signature]) -> Vec<String> {
    signatures.iter().map(|s| hex::encode(&s.key_id)).collect()
}

fn summarize_root(signed: &SignedRootMetadata) -> Result<RootSummary, CliError> {
    let root = RootMetadata::decode(signed.serialized_root_metadata.as_slice())
        .map_err(|e| CliError::InvalidInput(format!("root metadata does not decode: {e}")))?;
    Ok(RootSummary {
        version: root.version(),
        key_ids: root.keys.iter().map(|k| hex::encode(&k.key_id)).collect(),
        root_threshold: root.root_signature_requirement.as_ref().map_or(0, |r| r.threshold),
        targets_threshold: root.targets_signature_requirement.as_ref().map_or(0, |r| r.threshold),
        signed_by: signer_ids(&signed.signatures),
    })
}

fn summarize(bundle: &UpdateBundle, size: usize) -> Result<InspectOutput, CliError> {
    let root = bundle.root_metadata.as_ref().map(summarize_root).transpose()?;
    let targets = match bundle.targets_metadata.get(TOP_LEVEL_TARGETS_NAME) {
        Some(signed) => {
            let metadata = TargetsMetadata::decode(signed.serialized_targets_metadata.as_slice())
                .map_err(|e| CliError::InvalidInput(format!("targets metadata does not decode: {e}")))?;
            Some(TargetsSummary {
                version: metadata.version(),
                signed_by: signer_ids(&signed.signatures),
                targets: metadata
                    .target_files
                    .iter()
                    .map(|t| TargetSummary {
                        name: t.file_name.clone(),
                        length: t.length,
                        sha256: t.sha256().map(hex::encode),
                        in_bundle: bundle.target_payloads.contains_key(&t.file_name),
                    })
                    .collect(),
            })
        }
        None => None,
    };
    Ok(InspectOutput {
        size,
        root,
        targets,
        payload_bytes: bundle.target_payloads.values().map(Vec::len).sum(),
    })
}

fn inspect(path: &Path, json: bool) -> Result<(), CliError> {
    let bytes = read_input(path)?;
    let bundle = UpdateBundle::decode(bytes.as_slice())
        .map_err(|e| CliError::InvalidInput(format!("{} is not an update bundle: {e}", path.display())))?;
    let summary = summarize(&bundle, bytes.len())?;
    if json {
        return output::print_success_json(&summary);
    }

    println!("{} {}", "Bundle".bold(), path.display());
    output::field("Size", format!("{} bytes", summary.size));
    output::field("Payload bytes", summary.payload_bytes);
    match &summary.root {
        Some(root) => {
            println!("{}", "Root metadata".bold());
            output::field("Version", root.version);
            output::field("Keys", root.key_ids.len());
            output::field("Root threshold", root.root_threshold);
            output::field("Targets threshold", root.targets_threshold);
            output::field("Signatures", root.signed_by.len());
        }
        None => println!("{}", "No root metadata".dimmed()),
    }
    match &summary.targets {
        Some(targets) => {
            println!("{}", "Targets metadata".bold());
            output::field("Version", targets.version);
            output::field("Signatures", targets.signed_by.len());
            for target in &targets.targets {
                let location = if target.in_bundle {
                    "in bundle".green()
                } else {
                    "personalized out".yellow()
                };
                println!(
                    "    {} {} bytes, sha256 {} ({location})",
                    target.name.bold(),
                    target.length,
                    target.sha256.as_deref().unwrap_or("missing"),
                );
            }
        }
        None => println!("{}", "No top-level targets metadata".yellow()),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct VerifiedTarget {
    name: String,
    length: u64,
    in_bundle: bool,
}

#[derive(Debug, Serialize)]
struct VerifyOutput {
    verified: bool,
    trusted_root_version: Option<u32>,
    root_rotated: bool,
    targets_version: u32,
    targets: Vec<VerifiedTarget>,
    user_manifest_sha256: Option<String>,
}

fn verify(
    bundle_path: &Path,
    root: Option<&Path>,
    manifest: Option<&Path>,
    config: BundleAccessorConfig,
    json: bool,
) -> Result<(), CliError> {
    let bundle = read_input(bundle_path)?;
    let provisioned_root = root.map(read_input).transpose()?;
    let mut backend = InMemoryBackend::new();
    backend.set_trusted_root(provisioned_root.clone());
    if let Some(path) = manifest {
        backend.set_manifest(Some(read_input(path)?));
    }
    let backend = Arc::new(Mutex::new(backend));
    let dyn_backend: Arc<Mutex<dyn BundledUpdateBackend>> = backend.clone();

    let mut accessor =
        UpdateBundleAccessor::new(Box::new(MemoryOpenableReader::new(bundle)), dyn_backend, config);
    accessor
        .open_and_verify()
        .map_err(CliError::from_verification)?;

    let verified_manifest = accessor.get_manifest()?;
    let targets = verified_manifest
        .target_files()
        .iter()
        .map(|t| VerifiedTarget {
            name: t.file_name.clone(),
            length: t.length,
            in_bundle: accessor.get_target_payload(&t.file_name).is_ok(),
        })
        .collect();
    let summary = VerifyOutput {
        verified: true,
        trusted_root_version: accessor.trusted_root_version(),
        root_rotated: backend.lock().trusted_root() != provisioned_root.as_deref(),
        targets_version: verified_manifest.version(),
        targets,
        user_manifest_sha256: verified_manifest.user_manifest().map(|m| hex::encode(sha256(m))),
    };
    accessor.close()?;
    info!(path = %bundle_path.display(), version = summary.targets_version, "Bundle verified");

    if json {
        return output::print_success_json(&summary);
    }
    println!("{} {}", "Verified".green().bold(), bundle_path.display());
    if let Some(version) = summary.trusted_root_version {
        output::field("Trusted root", format!("version {version}"));
    }
    if summary.root_rotated {
        output::field("Root rotation", "bundle carries a newer root");
    }
    output::field("Targets version", summary.targets_version);
    for target in &summary.targets {
        let note = if target.in_bundle { "" } else { " (personalized out)" };
        println!("    {} {} bytes{note}", target.name.bold(), target.length);
    }
    Ok(())
}

//! `bundlectl root`

use std::fs;
use std::path::{Path, PathBuf};

use colored::*;
use prost::Message;
use serde::Serialize;
use tracing::info;
use updatekit_software_update::{RootMetadataBuilder, verify_metadata_signatures};

use crate::commands::RootCommands;
use crate::error::CliError;
use crate::keys::read_signing_keys;
use crate::output;

/// Execute root command
pub fn execute(cmd: &RootCommands, json: bool) -> Result<(), CliError> {
    match cmd {
        RootCommands::Build {
            keys,
            targets_keys,
            extra_signers,
            threshold,
            targets_threshold,
            version,
            out,
        } => build(
            &BuildArgs {
                keys,
                targets_keys,
                extra_signers,
                threshold: *threshold,
                targets_threshold: *targets_threshold,
                version: *version,
            },
            out,
            json,
        ),
    }
}

struct BuildArgs<'a> {
    keys: &'a [PathBuf],
    targets_keys: &'a [PathBuf],
    extra_signers: &'a [PathBuf],
    threshold: u32,
    targets_threshold: u32,
    version: u32,
}

#[derive(Debug, Serialize)]
struct RootOutput {
    root_file: String,
    version: u32,
    root_key_ids: Vec<String>,
    targets_key_ids: Vec<String>,
    threshold: u32,
    targets_threshold: u32,
    signatures: usize,
}

fn build(args: &BuildArgs<'_>, out: &Path, json: bool) -> Result<(), CliError> {
    if args.threshold == 0 || args.targets_threshold == 0 {
        return Err(CliError::InvalidInput("thresholds must be at least 1".to_string()));
    }
    let root_keys = read_signing_keys(args.keys)?;
    let targets_keys = if args.targets_keys.is_empty() {
        root_keys.clone()
    } else {
        read_signing_keys(args.targets_keys)?
    };
    if args.targets_threshold as usize > targets_keys.len() {
        return Err(CliError::InvalidInput(format!(
            "targets threshold {} exceeds the {} targets keys",
            args.targets_threshold,
            targets_keys.len()
        )));
    }

    let builder = root_keys
        .iter()
        .fold(RootMetadataBuilder::new(args.version), |b, k| b.root_key(k.public_key_sec1()));
    let builder = targets_keys
        .iter()
        .fold(builder, |b, k| b.targets_key(k.public_key_sec1()))
        .root_threshold(args.threshold)
        .targets_threshold(args.targets_threshold);
    let root = builder.build();

    let mut signers = root_keys.clone();
    signers.extend(read_signing_keys(args.extra_signers)?);
    let signed = updatekit_software_update::sign_root(&root, &signers)?;

    // A root that cannot satisfy its own threshold can never be installed.
    verify_metadata_signatures(
        &signed.serialized_root_metadata,
        &signed.signatures,
        root.root_signature_requirement.as_ref(),
        &root.keys,
    )
    .map_err(|e| CliError::InvalidInput(format!("root does not meet its own threshold: {e}")))?;

    fs::write(out, signed.encode_to_vec())?;
    info!(version = args.version, path = %out.display(), "Wrote signed root metadata");

    let summary = RootOutput {
        root_file: out.display().to_string(),
        version: args.version,
        root_key_ids: root_keys.iter().map(|k| hex::encode(k.key_id())).collect(),
        targets_key_ids: targets_keys.iter().map(|k| hex::encode(k.key_id())).collect(),
        threshold: args.threshold,
        targets_threshold: args.targets_threshold,
        signatures: signed.signatures.len(),
    };
    if json {
        return output::print_success_json(&summary);
    }
    println!("{} {}", "Wrote root metadata".green().bold(), summary.root_file);
    output::field("Version", summary.version);
    output::field("Root keys", format!("{} (threshold {})", root_keys.len(), summary.threshold));
    output::field(
        "Targets keys",
        format!("{} (threshold {})", targets_keys.len(), summary.targets_threshold),
    );
    output::field("Signatures", summary.signatures);
    Ok(())
}

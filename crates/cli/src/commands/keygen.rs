//! `bundlectl keygen`

use std::path::Path;

use colored::*;
use serde::Serialize;
use tracing::info;
use updatekit_crypto::SigningKeyPair;

use crate::error::CliError;
use crate::keys::write_signing_key;
use crate::output;

#[derive(Debug, Serialize)]
struct KeygenOutput {
    key_file: String,
    key_id: String,
    public_key: String,
}

/// Generate a P-256 key pair and store the private half as hex.
pub fn execute(out: &Path, force: bool, json: bool) -> Result<(), CliError> {
    let key = SigningKeyPair::generate();
    write_signing_key(out, &key, force)?;
    let summary = KeygenOutput {
        key_file: out.display().to_string(),
        key_id: hex::encode(key.key_id()),
        public_key: hex::encode(key.public_key_sec1()),
    };
    info!(key_id = %summary.key_id, path = %summary.key_file, "Generated signing key");

    if json {
        return output::print_success_json(&summary);
    }
    println!("{} {}", "Wrote".green().bold(), summary.key_file);
    output::field("Key ID", &summary.key_id);
    output::field("Public key", &summary.public_key);
    Ok(())
}

//! Key and input file helpers

use std::fs;
use std::path::Path;

use tracing::debug;
use updatekit_crypto::SigningKeyPair;

use crate::error::CliError;

/// Load a hex-encoded P-256 private key.
pub fn read_signing_key(path: &Path) -> Result<SigningKeyPair, CliError> {
    let text = fs::read_to_string(path).map_err(|e| {
        CliError::InvalidInput(format!("cannot read key {}: {e}", path.display()))
    })?;
    let key = SigningKeyPair::from_hex(&text).map_err(|e| {
        CliError::InvalidInput(format!("{} is not a P-256 private key: {e}", path.display()))
    })?;
    debug!(path = %path.display(), key_id = %hex::encode(key.key_id()), "Loaded signing key");
    Ok(key)
}

pub fn read_signing_keys(paths: &[impl AsRef<Path>]) -> Result<Vec<SigningKeyPair>, CliError> {
    paths.iter().map(|p| read_signing_key(p.as_ref())).collect()
}

/// Write a private key as hex, refusing to clobber an existing file unless
/// `force` is set.
pub fn write_signing_key(path: &Path, key: &SigningKeyPair, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::InvalidInput(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    fs::write(path, format!("{}\n", key.private_key_hex()))?;
    Ok(())
}

pub fn read_input(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|e| CliError::InvalidInput(format!("cannot read {}: {e}", path.display())))
}

/// Parse a `name=path` target argument.
pub fn parse_target_arg(arg: &str) -> Result<(String, std::path::PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), path.into()))
        }
        _ => Err(format!("expected NAME=PATH, got {arg:?}")),
    }
}

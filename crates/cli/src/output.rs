//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use serde::Serialize;
use serde_json::json;

use crate::error::CliError;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": format!("{error:#}"),
            "type": error_type_name(error)
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format error as JSON: {e}"),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    match error.downcast_ref::<CliError>() {
        Some(CliError::VerificationFailed(_)) => "verification_failed",
        Some(CliError::InvalidInput(_)) => "invalid_input",
        Some(CliError::IoError(_)) => "io",
        Some(CliError::JsonError(_)) => "json",
        Some(CliError::Update(e)) => e.kind().as_str(),
        None => "unknown",
    }
}

/// Print `value` as pretty JSON wrapped in a `{"success": true, ...}`
/// envelope.
pub fn print_success_json(value: &impl Serialize) -> Result<(), CliError> {
    let mut body = serde_json::to_value(value)?;
    if let Some(object) = body.as_object_mut() {
        object.insert("success".to_string(), serde_json::Value::Bool(true));
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// `label: value` line with the label dimmed.
pub fn field(label: &str, value: impl std::fmt::Display) {
    let label = format!("{label}:");
    println!("  {:<18} {}", label.as_str().dimmed(), value);
}

/// Abbreviated hex for key ids and hashes.
pub fn short_hex(bytes: &[u8]) -> String {
    let full = hex::encode(bytes);
    match full.get(..16) {
        Some(prefix) if full.len() > 16 => format!("{prefix}…"),
        _ => full,
    }
}

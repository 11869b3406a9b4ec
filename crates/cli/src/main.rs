//! bundlectl - update bundle tooling
//!
//! Generates signing keys, builds and signs root metadata and update
//! bundles, and verifies bundles with the same code a device runs.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod keys;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{BundleCommands, RootCommands};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "bundlectl")]
#[command(about = "Build, sign, inspect and verify software update bundles")]
#[command(version)]
#[command(long_about = "
bundlectl is the host-side companion of the update service. It generates
P-256 signing keys, builds signed root metadata and update bundles, and
verifies bundles with the same verification chain a device runs.

Exit codes: 0 success, 2 bundle rejected, 3 invalid input, 1 other failure.
Use --json for machine-readable output.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(long, global = true, help = "Output in JSON format for machine parsing")]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a P-256 signing key
    Keygen {
        /// Output file for the hex-encoded private key
        #[arg(short, long)]
        out: PathBuf,
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Root metadata commands
    #[command(subcommand)]
    Root(RootCommands),

    /// Update bundle commands
    #[command(subcommand)]
    Bundle(BundleCommands),

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("bundlectl={log_level},updatekit_software_update={log_level}").into()
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Keygen { out, force } => {
            commands::keygen::execute(out, *force, cli.json).context("keygen failed")
        }
        Commands::Root(cmd) => commands::root::execute(cmd, cli.json).context("root command failed"),
        Commands::Bundle(cmd) => {
            commands::bundle::execute(cmd, cli.json).context("bundle command failed")
        }
        Commands::Completion { shell } => {
            completion::generate_completion(*shell);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_keygen() -> TestResult {
        let cli = Cli::try_parse_from(["bundlectl", "keygen", "--out", "k.hex"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        match &cli.command {
            Commands::Keygen { out, force } => {
                assert_eq!(out, &PathBuf::from("k.hex"));
                assert!(!force);
            }
            _ => return Err("expected Keygen command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from(["bundlectl", "bundle", "inspect", "b.bin", "--json", "-vv"])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        Ok(())
    }

    #[test]
    fn parse_root_build() -> TestResult {
        let cli = Cli::try_parse_from([
            "bundlectl", "root", "build", "--key", "a.hex", "--key", "b.hex", "--threshold", "2",
            "--version", "3", "--out", "root.bin",
        ])?;
        match &cli.command {
            Commands::Root(RootCommands::Build {
                keys,
                targets_keys,
                threshold,
                targets_threshold,
                version,
                out,
                ..
            }) => {
                assert_eq!(keys.len(), 2);
                assert!(targets_keys.is_empty());
                assert_eq!(*threshold, 2);
                assert_eq!(*targets_threshold, 1);
                assert_eq!(*version, 3);
                assert_eq!(out, &PathBuf::from("root.bin"));
            }
            _ => return Err("expected Root Build command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_bundle_build_targets() -> TestResult {
        let cli = Cli::try_parse_from([
            "bundlectl",
            "bundle",
            "build",
            "--targets-key",
            "t.hex",
            "--version",
            "7",
            "--target",
            "app=build/app.bin",
            "--target",
            "boot=build/boot.bin",
            "--personalized-out",
            "secret=keys.bin",
            "--out",
            "bundle.bin",
        ])?;
        match &cli.command {
            Commands::Bundle(BundleCommands::Build {
                targets,
                personalized_out,
                version,
                root,
                ..
            }) => {
                assert_eq!(*version, 7);
                assert_eq!(targets[0], ("app".to_string(), PathBuf::from("build/app.bin")));
                assert_eq!(targets.len(), 2);
                assert_eq!(personalized_out.len(), 1);
                assert!(root.is_none());
            }
            _ => return Err("expected Bundle Build command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_bundle_verify_self() -> TestResult {
        let cli = Cli::try_parse_from(["bundlectl", "bundle", "verify", "b.bin", "--self-verify"])?;
        match &cli.command {
            Commands::Bundle(BundleCommands::Verify {
                root, self_verify, ..
            }) => {
                assert!(root.is_none());
                assert!(self_verify);
            }
            _ => return Err("expected Bundle Verify command".into()),
        }
        Ok(())
    }

    #[test]
    fn reject_verify_without_root() {
        let result = Cli::try_parse_from(["bundlectl", "bundle", "verify", "b.bin"]);
        assert!(result.is_err());
    }

    #[test]
    fn reject_malformed_target() {
        let result = Cli::try_parse_from([
            "bundlectl", "bundle", "build", "--version", "1", "--target", "app", "--out", "b.bin",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn reject_root_build_without_key() {
        let result =
            Cli::try_parse_from(["bundlectl", "root", "build", "--version", "1", "--out", "r.bin"]);
        assert!(result.is_err());
    }

    #[test]
    fn reject_no_subcommand() {
        assert!(Cli::try_parse_from(["bundlectl"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

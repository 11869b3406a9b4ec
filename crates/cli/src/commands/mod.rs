//! Command implementations for bundlectl

pub mod bundle;
pub mod keygen;
pub mod root;

use std::path::PathBuf;

use clap::Subcommand;
use updatekit_software_update::DEFAULT_MAX_TARGET_PAYLOAD_SIZE;

use crate::keys::parse_target_arg;

#[derive(Subcommand)]
pub enum RootCommands {
    /// Build and sign root metadata
    Build {
        /// Private key trusted to sign root metadata (repeatable); each one
        /// signs the new root
        #[arg(long = "key", required = true)]
        keys: Vec<PathBuf>,
        /// Private key trusted to sign targets metadata (repeatable);
        /// defaults to the root keys
        #[arg(long = "targets-key")]
        targets_keys: Vec<PathBuf>,
        /// Additional signer, e.g. a key of the root being rotated away from
        #[arg(long = "sign-with")]
        extra_signers: Vec<PathBuf>,
        /// Root signatures required on the next root
        #[arg(long, default_value_t = 1)]
        threshold: u32,
        /// Signatures required on targets metadata
        #[arg(long, default_value_t = 1)]
        targets_threshold: u32,
        /// Root metadata version
        #[arg(long)]
        version: u32,
        /// Output file for the serialized signed root
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum BundleCommands {
    /// Build and sign an update bundle
    Build {
        /// Private key that signs the targets metadata (repeatable)
        #[arg(long = "targets-key")]
        targets_keys: Vec<PathBuf>,
        /// Targets metadata version
        #[arg(long)]
        version: u32,
        /// Target shipped in the bundle, as NAME=PATH (repeatable)
        #[arg(long = "target", value_parser = parse_target_arg)]
        targets: Vec<(String, PathBuf)>,
        /// Target measured into the metadata but left out of the bundle, as
        /// NAME=PATH (repeatable)
        #[arg(long = "personalized-out", value_parser = parse_target_arg)]
        personalized_out: Vec<(String, PathBuf)>,
        /// Signed root metadata to carry in the bundle
        #[arg(long)]
        root: Option<PathBuf>,
        /// Opaque product manifest to ship as the user manifest target
        #[arg(long)]
        user_manifest: Option<PathBuf>,
        /// Output file for the bundle
        #[arg(short, long)]
        out: PathBuf,
        /// Also write the manifest a device holds after installing the
        /// bundle
        #[arg(long)]
        device_manifest_out: Option<PathBuf>,
    },

    /// Show the contents of a bundle without verifying it
    Inspect {
        /// Bundle file
        bundle: PathBuf,
    },

    /// Verify a bundle the way a device would
    Verify {
        /// Bundle file
        bundle: PathBuf,
        /// Signed root metadata the device trusts
        #[arg(long, required_unless_present = "self_verify")]
        root: Option<PathBuf>,
        /// Manifest of the software installed on the device
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Trust the root carried in the bundle itself
        #[arg(long)]
        self_verify: bool,
        /// Reject targets whose payload is not in the bundle
        #[arg(long)]
        no_personalization: bool,
        /// Largest accepted target payload, in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_TARGET_PAYLOAD_SIZE)]
        max_payload_size: u64,
    },
}

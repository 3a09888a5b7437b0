//! CLI argument definitions using clap derive
//!
//! The subcommands mirror the v2 buildpack phase scripts: the platform
//! invokes `bin/supply`, `bin/detect`, `bin/finalize`, and `bin/release`,
//! each of which execs this binary with the matching subcommand and passes
//! the platform-provided directories through as positional arguments.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// cnbridge - run Cloud Native Buildpacks on a v2 buildpack platform
#[derive(Parser, Debug)]
#[command(name = "cnbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands, one per v2 staging phase
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Relocate the app and archive this buildpack's order fragment
    Supply(SupplyArgs),

    /// Run v3 detection against the merged order
    Detect(DetectArgs),

    /// Run the v3 builder and rebuild the droplet layout
    Finalize(FinalizeArgs),

    /// Print the start-command YAML for the droplet
    Release(ReleaseArgs),
}

/// Arguments for the supply command
#[derive(Parser, Debug)]
pub struct SupplyArgs {
    /// The platform's build dir (the v2 app)
    pub build_dir: PathBuf,

    /// The platform's cache dir, persisted across builds
    pub cache_dir: PathBuf,

    /// The v2 deps dir shared by all buildpacks of the build
    pub deps_dir: PathBuf,

    /// This buildpack's index within the build
    pub deps_index: String,
}

/// Arguments for the detect command
#[derive(Parser, Debug)]
pub struct DetectArgs {
    /// The platform's build dir (the v2 app)
    pub build_dir: PathBuf,
}

/// Arguments for the finalize command
#[derive(Parser, Debug)]
pub struct FinalizeArgs {
    /// The platform's build dir (the v2 app)
    pub build_dir: PathBuf,

    /// The platform's cache dir, persisted across builds
    pub cache_dir: PathBuf,

    /// The v2 deps dir shared by all buildpacks of the build
    pub deps_dir: PathBuf,

    /// This buildpack's index within the build
    pub deps_index: String,

    /// Directory for profile.d scripts sourced at launch
    pub profile_dir: PathBuf,
}

/// Arguments for the release command
#[derive(Parser, Debug)]
pub struct ReleaseArgs {
    /// The platform's build dir (the rebuilt v2 app)
    pub build_dir: PathBuf,
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // release builds are tagged, dev builds carry the commit
    if let Some(tag) = option_env!("CRTM_GIT_TAG") {
        return tag;
    }

    let commit = option_env!("CRTM_GIT_COMMIT").unwrap_or("unknown");
    let version = format!("v{}-{}", BASE_VERSION, commit);
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "crtm")]
#[command(about = "Install, update and remove prebuilt release tools")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only, without progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Directory tool executables are installed into
    #[arg(short = 'p', long, global = true, env = "CRTM_BINARY_PATH")]
    pub binary_path: Option<PathBuf>,

    /// Configuration file (defaults to ~/.config/crtm/config.yaml)
    #[arg(long, global = true, env = "CRTM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip the startup check for a newer crtm release
    #[arg(long, global = true)]
    pub disable_update_check: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install tools that are not installed yet
    Install {
        /// Tools to install
        #[arg(required_unless_present = "all")]
        tools: Vec<String>,
        /// Install every known tool
        #[arg(short, long, conflicts_with = "tools")]
        all: bool,
    },

    /// Update installed tools to their latest release
    Update {
        /// Tools to update
        #[arg(required_unless_present = "all")]
        tools: Vec<String>,
        /// Update every known tool
        #[arg(short, long, conflicts_with = "tools")]
        all: bool,
        /// Do not print release notes after updating
        #[arg(long)]
        disable_changelog: bool,
    },

    /// Remove installed tools
    Remove {
        /// Tools to remove
        #[arg(required_unless_present = "all")]
        tools: Vec<String>,
        /// Remove every known tool
        #[arg(short, long, conflicts_with = "tools")]
        all: bool,
    },

    /// Show every known tool and whether it is up to date
    List,

    /// Update crtm itself to the latest release
    SelfUpdate {
        /// Do not print release notes after updating
        #[arg(long)]
        disable_changelog: bool,
    },

    /// Print the directory tools are installed into
    Path,

    /// Show crtm version
    Version,
}

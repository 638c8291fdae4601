//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// wheelsmith - cached, verified Python wheel builds
///
/// Builds wheels once, stores them content-addressed, and shares them
/// through a registry without trusting anything it downloads.
#[derive(Parser, Debug)]
#[command(name = "wheelsmith")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WHEELSMITH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .wheelsmith.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a wheel, reusing cached or published artifacts when possible
    Build(BuildArgs),

    /// Inspect and maintain the local artifact cache
    Cache(CacheArgs),

    /// Push to or pull from the wheel registry
    Registry(RegistryArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Arguments for the build command
#[derive(Parser, Debug)]
#[command(disable_version_flag = true)]
pub struct BuildArgs {
    /// Project directory (defaults to current directory)
    pub path: Option<PathBuf>,

    /// Project name, instead of reading pyproject.toml
    #[arg(long, requires = "project_version")]
    pub name: Option<String>,

    /// Project version, instead of reading pyproject.toml
    #[arg(long = "version", requires = "name")]
    pub project_version: Option<String>,

    /// Output directory (default: build.output_dir under the project)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Publish the built wheel to the registry
    #[arg(long)]
    pub publish: bool,

    /// Do not try the registry before building
    #[arg(long)]
    pub no_pull: bool,

    /// Remove the output directory first
    #[arg(long)]
    pub clean: bool,

    /// Result format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show size and entry counts
    Stats {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List cached wheels, most recently used first
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Re-hash stored wheels and evict corrupt ones
    Verify {
        /// Only verify this digest
        digest: Option<String>,
    },

    /// Reconcile storage and enforce size limits
    Gc {
        /// Also remove entries unused for N days
        #[arg(long)]
        days: Option<u32>,

        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Add an existing wheel file to the cache
    Insert {
        /// Wheel file
        wheel: PathBuf,

        /// Build fingerprint to record for the wheel
        #[arg(long)]
        source_hash: Option<String>,
    },

    /// Remove one entry
    Purge {
        /// Digest or unique digest prefix
        digest: String,
    },

    /// Remove every entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the registry command
#[derive(Parser, Debug)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub action: RegistryAction,
}

#[derive(Subcommand, Debug)]
pub enum RegistryAction {
    /// Publish cached wheels
    Push {
        /// Digests (or unique prefixes) of cached wheels
        #[arg(required = true)]
        digests: Vec<String>,

        /// Attempts while the registry is unavailable (default: from config)
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Fetch a wheel into the cache
    Pull {
        /// `sha256:<hex>`, `<hex>` or `name==version`
        id: String,

        /// Also copy the wheel into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., cache.max_size_mb)
        key: String,
        /// Value to set; lists are comma-separated
        value: String,
        /// Write to project-local .wheelsmith.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}

/// Output format for listings and results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// One item per line
    Plain,
}

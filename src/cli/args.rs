//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Stowaway - Rule-based build cache
///
/// Packs build directories into one artifact keyed by a template such as
/// `deps-{{ arch }}-{{ checksum "Cargo.lock" }}` and restores them by exact
/// or prefix match.
#[derive(Parser, Debug)]
#[command(name = "stowaway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STOWAWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory of the object store (overrides store.root)
    #[arg(long, global = true, env = "STOWAWAY_STORE_ROOT")]
    pub store_root: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive paths and upload them under a resolved key
    Store(StoreArgs),

    /// Download the best matching cache and put its paths back
    Restore(RestoreArgs),

    /// Resolve key templates without touching the store
    Key(KeyArgs),

    /// List stored caches
    List(ListArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Arguments for the store command
#[derive(Parser, Debug)]
pub struct StoreArgs {
    /// Cache key template
    pub key: String,

    /// Paths to cache, relative to the current directory
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Bucket to upload into
    #[arg(short, long, env = "STOWAWAY_BUCKET")]
    pub bucket: String,
}

/// Arguments for the restore command
#[derive(Parser, Debug)]
pub struct RestoreArgs {
    /// Candidate key templates, most specific first
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Bucket to download from
    #[arg(short, long, env = "STOWAWAY_BUCKET")]
    pub bucket: String,
}

/// Arguments for the key command
#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Key templates to resolve
    #[arg(required = true)]
    pub templates: Vec<String>,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only show keys starting with this prefix
    #[arg(default_value = "")]
    pub prefix: String,

    /// Bucket to list
    #[arg(short, long, env = "STOWAWAY_BUCKET")]
    pub bucket: String,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., archive.compression_level)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

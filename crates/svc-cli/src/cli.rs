use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "svcdb",
    about = "Inspect and maintain services flat-file databases",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file with database settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store file inside the data directory (overrides the configuration)
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse the store and report its grammar version and row counts
    Check,
    /// Copy every row through a fresh write session
    Rewrite,
    /// List, read, or change object metadata
    Meta(MetaArgs),
}

#[derive(Args)]
pub struct MetaArgs {
    #[command(subcommand)]
    pub action: MetaAction,
}

#[derive(Subcommand)]
pub enum MetaAction {
    /// Show every entry on an object
    List { object: String },
    /// Show one entry
    Get { object: String, key: String },
    /// Add or replace an entry, creating the object if needed
    Set { object: String, key: String, value: String },
    /// Remove an entry
    Del { object: String, key: String },
}

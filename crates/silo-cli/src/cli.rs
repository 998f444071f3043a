use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "silo",
    about = "Silo: content-deduplicating file store operations",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./silo.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Audit records and repair every inconsistency found
    Check,
    /// Recompute canonical/duplicate assignments from content hashes
    Rebuild,
    /// Show storage statistics
    Stats,
    /// Detailed storage analysis
    Analyze(AnalyzeArgs),
    /// Delete every duplicate file
    PurgeDuplicates(PurgeArgs),
    /// Store a file
    Ingest(IngestArgs),
    /// Show one file and its role
    Show(ShowArgs),
    /// Delete a file
    Delete(DeleteArgs),
    /// Rewrite the record journal as a single snapshot
    Compact,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Only list files with at least this many duplicates
    #[arg(long, default_value = "1")]
    pub min_duplicates: usize,
    /// How many of the most duplicated files to list
    #[arg(long, default_value = "10")]
    pub top: usize,
}

#[derive(Args)]
pub struct PurgeArgs {
    /// Report what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct IngestArgs {
    pub path: PathBuf,
    /// Display name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, default_value = "application/octet-stream")]
    pub media_type: String,
}

#[derive(Args)]
pub struct ShowArgs {
    pub id: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
    /// Allow deleting a canonical file by promoting one of its duplicates
    #[arg(long)]
    pub confirm: bool,
}

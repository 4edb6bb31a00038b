/// CLI argument parsing and command handling

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "envault")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Path to the deployment .env file
    #[arg(short, long, global = true, default_value = ".env")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export relational data and blob storage into a single archive
    Export {
        /// Output archive path (defaults to envault-<timestamp>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Comma-separated tables to exclude from the structured dump
        /// (defaults to the BACKUP_EXCLUDE setting)
        #[arg(long)]
        exclude: Option<String>,
    },

    /// Import a previously exported archive into this deployment
    Import {
        /// Archive file produced by `envault export`
        archive: PathBuf,
    },

    /// List the entries of an archive without extracting it
    Inspect {
        /// Archive file to examine
        archive: PathBuf,
    },
}

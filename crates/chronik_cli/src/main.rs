//! Chronik CLI
//!
//! Command-line tools for inspecting and maintaining journal directories.
//!
//! # Commands
//!
//! - `inspect` - Display a summary of the journal
//! - `verify` - Stream-verify every segment, optionally quarantining bad ones
//! - `dump` - Print records, with filter flags
//! - `seal` - Seal finalized segments and trim their sources

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Chronik journal command-line tools.
#[derive(Parser)]
#[command(name = "chronik")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal directory
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// File name template with one `*`, e.g. "mydb-*.wal"
    #[arg(global = true, short = 'n', long, default_value = "*")]
    file_name: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display a summary of the journal
    Inspect {
        /// List individual segments as well
        #[arg(short, long)]
        segments: bool,
    },

    /// Stream-verify every segment
    Verify {
        /// Move segments that fail verification into the trash directory
        #[arg(long)]
        quarantine: bool,

        /// Key file (64 raw bytes: key id then key material) for sealed
        /// segments
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },

    /// Print records
    Dump {
        /// Lowest record id to print
        #[arg(long, default_value = "0")]
        min_id: u64,

        /// Highest record id to print (0 = unbounded)
        #[arg(long, default_value = "0")]
        max_id: u64,

        /// Print at most this many records (0 = unbounded)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// With --limit, print the newest records instead of the oldest
        #[arg(long)]
        latest: bool,

        /// Key file for sealed segments
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },

    /// Seal finalized segments and trim their plaintext sources
    Seal {
        /// Key file (64 raw bytes: key id then key material)
        #[arg(short, long)]
        key_file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Inspect { segments } => {
            commands::inspect::run(&cli.path, &cli.file_name, cli.verbose, segments)
        }
        Commands::Verify {
            quarantine,
            key_file,
        } => commands::verify::run(
            &cli.path,
            &cli.file_name,
            cli.verbose,
            quarantine,
            key_file.as_deref(),
        ),
        Commands::Dump {
            min_id,
            max_id,
            limit,
            latest,
            key_file,
        } => commands::dump::run(
            &cli.path,
            &cli.file_name,
            cli.verbose,
            min_id,
            max_id,
            limit,
            latest,
            key_file.as_deref(),
        ),
        Commands::Seal { key_file } => {
            commands::seal::run(&cli.path, &cli.file_name, cli.verbose, &key_file)
        }
    }
}

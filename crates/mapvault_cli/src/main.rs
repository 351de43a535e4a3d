//! MapVault CLI
//!
//! Command-line tools for MapVault dataset files.
//!
//! # Commands
//!
//! - `inspect` - Display replica metadata, tables and pending changes
//! - `verify` - Scan the whole log and check every record
//! - `dump-log` - List log records for debugging
//! - `demo` - Provision a dataset from an in-memory service, edit and sync it

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MapVault command-line dataset tools.
#[derive(Parser)]
#[command(name = "mapvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dataset file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display replica metadata, tables and pending changes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify dataset integrity
    Verify,

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Provision, edit and sync a dataset against an in-memory service
    Demo {
        /// Number of features to add in the demo transaction
        #[arg(short, long, default_value = "3")]
        features: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Dataset path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Dataset path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.path.ok_or("Dataset path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Demo { features } => {
            let path = cli.path.ok_or("Dataset path required for demo")?;
            commands::demo::run(&path, features)?;
        }
        Commands::Version => {
            println!("MapVault CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Dataset log format v{} ({})",
                mapvault_core::LOG_VERSION,
                String::from_utf8_lossy(&mapvault_core::LOG_MAGIC)
            );
        }
    }

    Ok(())
}

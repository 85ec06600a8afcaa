use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "novastore",
    about = "Local storage engine for browser history, bookmarks, and preferences"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the storage command server.
    Serve,
    /// Show store locations and on-disk state.
    Status,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Write a bookmark snapshot (folders and bookmarks) to a JSON file.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Load a bookmark snapshot from a JSON file, all-or-nothing.
    Import {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

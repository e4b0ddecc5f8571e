//! Command-line interface for typeform.
//!
//! This module provides the CLI structure and output rendering for the
//! `typeform` binary.

mod commands;
pub mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{CacheCommand, ConfigCommand, OutputFormat, ResponsesCommand, SyncCommand};

/// typeform - Read and cache Typeform responses
///
/// Fetches form responses from the Typeform Responses API and keeps an
/// incremental local copy for offline queries.
#[derive(Debug, Parser)]
#[command(name = "typeform")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Form to operate on, overriding the configured form
    #[arg(long, global = true, value_name = "FORM_ID")]
    pub form: Option<String>,

    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch responses from the API
    Responses(ResponsesCommand),

    /// Download new responses into the local cache
    Sync(SyncCommand),

    /// Inspect the local cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}

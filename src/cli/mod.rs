//! CLI module for socketauth

pub mod args;
pub mod commands;
pub mod exit_code;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use args::{CompletionArgs, ConfigArgs, RunArgs, ServeArgs, VersionArgs};

/// Use a remote SSH agent over HTTP, one repository at a time
#[derive(Parser, Debug)]
#[command(name = "socketauth")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "SOCKETAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command with SSH_AUTH_SOCK tunneled to a gateway
    Run(RunArgs),

    /// Serve the local SSH agent to authenticated tunnel clients
    Serve(ServeArgs),

    /// Show or validate configuration
    Config(ConfigArgs),

    /// Show version information
    Version(VersionArgs),

    /// Generate shell completions
    Completion(CompletionArgs),
}

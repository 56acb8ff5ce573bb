//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Advisory locks on an etcd cluster
#[derive(Debug, Parser)]
#[command(name = "microlock", version, about)]
pub struct Cli {
    /// TOML settings file
    #[arg(short = 'c', long = "config", env = "MICROLOCK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// etcd client URL; repeat or separate with commas for several members
    #[arg(short = 'e', long = "endpoint", value_delimiter = ',', global = true)]
    pub endpoints: Vec<String>,

    /// Key representing the lock
    #[arg(short = 'k', long = "key", global = true)]
    pub key: Option<String>,

    /// Holder id (default: <hostname>-<random>)
    #[arg(long = "holder", global = true)]
    pub holder: Option<String>,

    /// Lease in seconds
    #[arg(short = 't', long = "ttl", global = true)]
    pub ttl: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Acquire the lock once
    Lock,
    /// Release the lock if held by this holder
    Unlock,
    /// Reset the lease of a lock held by this holder
    Renew,
    /// Show the current holder of the lock
    Status,
    /// Print lock and unlock events until interrupted
    Watch,
    /// Acquire, keep renewing until interrupted, then release
    Hold,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Lock => "lock",
            Command::Unlock => "unlock",
            Command::Renew => "renew",
            Command::Status => "status",
            Command::Watch => "watch",
            Command::Hold => "hold",
        }
    }
}

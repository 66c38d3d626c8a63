use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "lockbox",
    about = "Password-protected, self-expiring file vault",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Encrypt a file into the vault and print its id.
    Put {
        file: PathBuf,
        /// Password; prompted on stdin when omitted.
        #[arg(long)]
        password: Option<String>,
        /// Display name stored with the object (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
    },
    /// Decrypt an object to a file, or print a text object with `--show`.
    Get {
        id: String,
        /// Password; prompted on stdin (with retries) when omitted.
        #[arg(long)]
        password: Option<String>,
        /// Output path (defaults to the original name in the current directory).
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Access session used for the failed-attempt budget.
        #[arg(long, default_value = "cli")]
        session: String,
        /// Print a text object to stdout instead of writing a file.
        #[arg(long, conflicts_with = "out")]
        show: bool,
    },
    /// Show metadata and remaining lifetime of an object.
    Status {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Remove expired objects once and exit.
    Sweep,
    /// Run the expiry reaper until interrupted (Ctrl-C).
    Reaper,
    /// Store, read back, and delete a throwaway object.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

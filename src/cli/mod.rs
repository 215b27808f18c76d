//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for PodShell.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "podshell")]
#[command(about = "Interactive shells inside running cluster containers")]
#[command(long_about = "Open an interactive shell in a container of a running pod and exchange keystrokes and output in real time")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(long, default_value = "podshell.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Use the in-memory loopback transport instead of a cluster
    #[arg(long, global = true)]
    pub demo: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open an interactive shell in a pod container
    Shell {
        /// Pod name
        #[arg(long)]
        pod: String,

        /// Namespace (defaults to the configured namespace)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Container (defaults to the first container of the pod)
        #[arg(short, long)]
        container: Option<String>,

        /// Shell binary to try before the configured candidates
        #[arg(long)]
        shell: Option<String>,

        /// Connect timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List the containers of a pod
    Containers {
        /// Pod name
        #[arg(long)]
        pod: String,

        /// Namespace (defaults to the configured namespace)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

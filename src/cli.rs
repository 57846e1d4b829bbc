use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config_file::InstallConfig;
use crate::error::Result;
use crate::types::Variant;

/// bao-install - provision a host for the Bao PaaS
#[derive(Parser, Debug)]
#[command(name = "bao-install")]
#[command(about = "Create the bao service user, install its SSH key and entrypoint, bootstrap package managers")]
#[command(version, arg_required_else_help = true)]
pub struct Cli {
    /// Dry-run mode: print every step without executing any of them.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision this host (requires root)
    Install {
        #[command(flatten)]
        config: ConfigArgs,

        /// Skip the EUID 0 check
        #[arg(long)]
        skip_root_check: bool,

        /// Write a JSON report of every step to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show the steps `install` would run
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a provisioned host: user, entrypoint mode/owner, SSH key
    Verify {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print the checks as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a configuration file with default values
    ConfigInit {
        /// Destination file
        path: PathBuf,

        /// Variant recorded in the file
        #[arg(long, default_value = "python")]
        variant: Variant,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
}

/// Configuration source plus per-field overrides
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bootstrapper chain: python or python-node
    #[arg(long)]
    pub variant: Option<Variant>,

    /// Executable to install into the service account's home
    #[arg(short, long)]
    pub entrypoint: Option<PathBuf>,

    /// Service account name
    #[arg(short, long)]
    pub user: Option<String>,

    /// authorized_keys file whose first key is installed
    #[arg(long)]
    pub key_source: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the file (or defaults) and apply command-line overrides.
    pub fn resolve(&self) -> Result<InstallConfig> {
        let mut config = match &self.config {
            Some(path) => InstallConfig::load_from_file(path)?,
            None => InstallConfig::default(),
        };

        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(entrypoint) = &self.entrypoint {
            config.entrypoint_source = entrypoint.clone();
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(key_source) = &self.key_source {
            config.key_source = Some(key_source.clone());
        }

        Ok(config)
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

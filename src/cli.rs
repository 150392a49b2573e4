use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config_file::{DEFAULT_SETTINGS_PATH, Settings};

/// steamctl - sequence runner for steam/vacuum/extraction appliances
#[derive(Parser, Debug)]
#[command(name = "steamctl")]
#[command(about = "Runs timed device sequences against a pigpio daemon")]
#[command(version)]
pub struct Cli {
    /// Settings file with the device table and daemon address
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Daemon host (overrides the settings file)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Daemon port (overrides the settings file)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Dry-run mode: log channel writes instead of talking to the daemon.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// More output (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a task file, then stop every device
    Run {
        /// Task file (YAML `actions:` list)
        sequence: PathBuf,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a task file against the device table without connecting
    Validate {
        /// Task file to check
        sequence: PathBuf,
    },
    /// List configured devices in order
    Devices,
    /// Stop every configured device and release the daemon
    StopAll,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Apply `--host` / `--port` on top of loaded settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.daemon.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.daemon.port = port;
        }
    }

    /// Default log filter for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

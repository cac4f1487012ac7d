//! Command-line interface definition for Ridepool
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for the webhook server and the match worker.

use clap::{Parser, Subcommand};

/// Ridepool - SMS ride-matching service
///
/// Collects trip details over SMS and pairs riders whose pickup and
/// dropoff points land in the same area.
#[derive(Parser, Debug, Clone)]
#[command(name = "ridepool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: String,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Ridepool
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the inbound SMS webhook server
    Serve,

    /// Run the match worker consuming session-completion events
    MatchWorker,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

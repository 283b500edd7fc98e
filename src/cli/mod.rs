//! CLI commands
//!
//! `benchd serve` runs the daemon; the other commands inspect the local
//! configuration and hardware without starting it.

mod frameworks;
mod gpu;
mod serve;

pub use frameworks::frameworks;
pub use gpu::gpu;
pub use serve::serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// benchd - single-GPU inference server arbiter and benchmark runner
#[derive(Parser)]
#[command(name = "benchd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (YAML or JSON); falls back to $BENCHD_CONFIG
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control daemon
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,
    },

    /// List configured frameworks
    Frameworks {
        /// Probe each framework's health endpoint
        #[arg(long)]
        probe: bool,
    },

    /// Take one GPU sample and print it
    Gpu {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from(["benchd", "--config", "benchd.yaml", "serve", "--port", "9000"]);
        assert_eq!(cli.config, Some(PathBuf::from("benchd.yaml")));
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(9000));
                assert!(host.is_none());
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_frameworks_probe() {
        let cli = Cli::parse_from(["benchd", "frameworks", "--probe"]);
        assert!(matches!(cli.command, Commands::Frameworks { probe: true }));
        assert!(cli.config.is_none());
    }
}

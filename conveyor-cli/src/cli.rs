//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "conveyor", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Run as a pipeline role process (internal use)
    #[arg(long, hide = true)]
    pub role_process: bool,

    /// Role configuration written by the supervisor (used with --role-process)
    #[arg(long, value_name = "PATH", hide = true)]
    pub pipeline_config: Option<PathBuf>,

    /// Where to record a fault before exiting (used with --role-process)
    #[arg(long, value_name = "PATH", hide = true)]
    pub fault_slot: Option<PathBuf>,

    /// Host queue manager serving this run's in-memory queues
    #[arg(long, value_name = "ADDR", hide = true)]
    pub queue_manager: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline: one input, N workers, one output
    Run {
        /// Number of worker processes; 1 runs the whole pipeline in this process
        #[arg(long, value_name = "N", default_value_t = 1)]
        cpus: usize,

        /// Dispatch workers to remote nodes through the broker
        #[arg(long)]
        remote: bool,

        /// Run identifier for networked runs (generated when omitted)
        #[arg(long, value_name = "ID", requires = "remote")]
        run_id: Option<String>,

        #[command(flatten)]
        broker: BrokerArgs,
    },

    /// Serve as a remote node running workers from the startup queue
    Serve {
        /// Workers this node runs at once
        #[arg(long, value_name = "N", default_value_t = 1)]
        max_workers: usize,

        #[command(flatten)]
        broker: BrokerArgs,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

/// Broker connection overrides; unset flags keep the configured values
#[derive(Args, Debug, Default, Clone)]
pub struct BrokerArgs {
    /// Broker user [config default: guest]
    #[arg(long, value_name = "USER")]
    pub rabbit_username: Option<String>,

    /// Broker password [config default: guest]
    #[arg(long, value_name = "PASSWORD")]
    pub rabbit_password: Option<String>,

    /// Broker host [config default: localhost]
    #[arg(long, value_name = "HOST")]
    pub rabbit_host: Option<String>,

    /// Broker port [config default: 5672]
    #[arg(long, value_name = "PORT")]
    pub rabbit_port: Option<u16>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Write a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use raffle_deploy::{CONFIG_FILENAME, DeployTag};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "raffle")]
#[command(
    author,
    version,
    about = "Deploy, verify and exercise the decentralized raffle"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "RAFFLE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file. Missing files fall back to defaults.
    #[arg(short, long, alias = "conf", env = "RAFFLE_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the deployment scripts against a network.
    Deploy {
        /// Network to deploy to. Overrides the configuration file.
        #[arg(short, long)]
        network: Option<String>,

        /// Scripts to run, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "all")]
        tags: Vec<DeployTag>,

        /// Save the effective configuration (without secrets) after deploying.
        #[arg(long, default_value_t = false)]
        save_config: bool,
    },

    /// List the known network profiles.
    Networks,

    /// Play one full round against a deployed raffle.
    ///
    /// On development networks the contracts are deployed first and the
    /// mock coordinator is fulfilled directly. Elsewhere the round waits for
    /// the live oracle to pick a winner.
    Staging {
        /// Network to play on. Overrides the configuration file.
        #[arg(short, long)]
        network: Option<String>,

        /// Seconds to wait for the winner on live networks.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

use std::path::PathBuf;

use clap::Parser;
use hatchery_deploy::{DEFAULT_UPKEEP_BATCH_SIZE, LocalNetwork};
use tracing::level_filters::LevelFilter;

/// Plan manifest picked up from the working directory when `--plan` is not given.
pub const DEFAULT_PLAN_FILE: &str = "Hatchery.toml";

#[derive(Parser)]
#[command(name = "hatchery")]
#[command(
    author,
    version,
    about = "Deploy contract artifacts idempotently, in order, onto a named network"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "HATCH_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The network to deploy to.
    ///
    /// Public networks are only available when INFURA_API_KEY and HDWALLET_MNEMONIC are set.
    #[arg(short, long, env = "HATCH_NETWORK", default_value_t = LocalNetwork::Localhost.to_string())]
    pub network: String,

    /// Path to a TOML deployment plan.
    ///
    /// If not provided, `Hatchery.toml` is used when present, otherwise the built-in
    /// prize pool plan.
    #[arg(short, long, env = "HATCH_PLAN")]
    pub plan: Option<PathBuf>,

    /// Directory holding one deployment record per artifact and network.
    #[arg(long, env = "HATCH_DEPLOYMENTS_DIR", default_value = "./deployments")]
    pub deployments_dir: PathBuf,

    /// Directory holding compiled contract artifacts.
    #[arg(long, env = "HATCH_ARTIFACTS_DIR", default_value = "./artifacts")]
    pub artifacts_dir: PathBuf,

    /// Redeploy every artifact, even when a deployment record already exists.
    #[arg(long, env = "HATCH_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,

    /// Batch size passed to the upkeep contract of the built-in plan.
    #[arg(long, env = "HATCH_UPKEEP_BATCH_SIZE", default_value_t = DEFAULT_UPKEEP_BATCH_SIZE)]
    pub upkeep_batch_size: u64,

    /// List the networks available with the current environment and exit.
    #[arg(long)]
    pub list_networks: bool,
}

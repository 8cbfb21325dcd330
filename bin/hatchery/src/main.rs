//! hatchery deploys contract artifacts onto a named network, reusing earlier deployments.

mod cli;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use figment::{
    Figment,
    providers::{Format, Toml},
};

use cli::{Cli, DEFAULT_PLAN_FILE};
use hatchery_deploy::{
    AccountProvider, AccountSource, ConfigEnv, DeploymentPlan, DeploymentReport, FileRecordStore,
    JsonRpcChainClient, Orchestrator, ResolvedNetworks, resolve,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let networks = resolve(&ConfigEnv::from_process())?;

    if cli.list_networks {
        println!("{}", networks_table(&networks));
        return Ok(ExitCode::SUCCESS);
    }

    let profile = networks.get(&cli.network).with_context(|| {
        format!(
            "Unknown network `{}`, available networks: {}",
            cli.network,
            networks.names().join(", ")
        )
    })?;

    let mut plan = load_plan(cli.plan.as_deref(), cli.upkeep_batch_size)?;
    if cli.redeploy {
        plan = plan.force_redeploy();
    }

    let client = JsonRpcChainClient::new(profile, &cli.artifacts_dir)?;
    let accounts = client
        .named_accounts(&profile.account_source, &profile.roles)
        .await
        .with_context(|| format!("Failed to load accounts for network `{}`", profile.name))?;
    let store = FileRecordStore::new(&cli.deployments_dir);

    let report = Orchestrator::new(&client, &store, &accounts)
        .run(profile, &plan.artifacts)
        .await?;

    println!("{}", report_table(&report));

    if let Some(error) = &report.halted {
        tracing::error!(network = %report.network, "Deployment halted: {error}");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Load the deployment plan.
///
/// Falls back to `Hatchery.toml` in the working directory, then to the built-in prize
/// pool plan.
fn load_plan(path: Option<&Path>, upkeep_batch_size: u64) -> Result<DeploymentPlan> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if Path::new(DEFAULT_PLAN_FILE).exists() => PathBuf::from(DEFAULT_PLAN_FILE),
        None => {
            tracing::info!(upkeep_batch_size, "Using the built-in prize pool plan");
            return Ok(DeploymentPlan::prize_pool(upkeep_batch_size));
        }
    };

    if !path.exists() {
        anyhow::bail!("Deployment plan does not exist: {}", path.display());
    }

    let plan: DeploymentPlan = Figment::new()
        .merge(Toml::file(&path))
        .extract()
        .with_context(|| format!("Failed to load deployment plan from {}", path.display()))?;

    tracing::info!(
        path = %path.display(),
        artifacts = plan.artifacts.len(),
        "Loaded deployment plan"
    );

    Ok(plan)
}

fn networks_table(networks: &ResolvedNetworks) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Network", "Chain ID", "Endpoint", "Accounts", "Records"]);

    for profile in networks.profiles() {
        let endpoint = profile
            .rpc_endpoint
            .as_ref()
            .and_then(|url| url.host_str())
            .unwrap_or("-");
        let accounts = match profile.account_source {
            AccountSource::Unlocked => "unlocked",
            AccountSource::Mnemonic { .. } => "mnemonic",
        };

        table.add_row(vec![
            profile.name.clone(),
            profile
                .chain_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            endpoint.to_string(),
            accounts.to_string(),
            if profile.persist_records {
                "persisted"
            } else {
                "ephemeral"
            }
            .to_string(),
        ]);
    }

    table
}

fn report_table(report: &DeploymentReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Artifact", "Status", "Address", "Transaction"]);

    for record in &report.records {
        table.add_row(vec![
            record.artifact_name.clone(),
            record.status.to_string(),
            record
                .address
                .map_or_else(|| "-".to_string(), |address| address.to_string()),
            record
                .tx_hash
                .map_or_else(|| "-".to_string(), |hash| hash.to_string()),
        ]);
    }

    table
}

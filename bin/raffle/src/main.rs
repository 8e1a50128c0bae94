//! raffle is a CLI tool to deploy, verify and play the decentralized raffle.

mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;

use cli::{Cli, Command};
use raffle_deploy::{
    ArtifactStore, Chain, Connection, DeployTag, LiveHarness, LocalHarness, Orchestrator,
    RaffleClient, RaffleConfig, RoundReport, contracts::RAFFLE,
};

/// Accounts entering the local staging round, after the deployer.
const LOCAL_ENTRANTS: usize = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = RaffleConfig::load(&cli.config)?;

    match cli.command {
        Command::Networks => print_networks(&config),
        Command::Deploy {
            network,
            tags,
            save_config,
        } => {
            if let Some(network) = network {
                config.network = network;
            }

            tracing::info!(
                network = %config.network,
                tags = ?tags,
                update_frontend = config.update_frontend,
                "Running deployment scripts..."
            );

            let connection = config.connect()?;
            let artifacts = config.artifacts(&connection);
            match connection {
                Connection::Simulated(chain) => deploy(&config, chain, artifacts, &tags).await?,
                Connection::Rpc(chain) => deploy(&config, chain, artifacts, &tags).await?,
            }

            if save_config {
                config.save_to_file(&cli.config)?;
            }
            Ok(())
        }
        Command::Staging { network, timeout } => {
            if let Some(network) = network {
                config.network = network;
            }
            if let Some(timeout) = timeout {
                config.live_timeout_secs = timeout;
            }

            let connection = config.connect()?;
            let artifacts = config.artifacts(&connection);
            let report = match connection {
                Connection::Simulated(chain) => staging(&config, chain, artifacts).await?,
                Connection::Rpc(chain) => staging(&config, chain, artifacts).await?,
            };

            report.check()?;
            tracing::info!(
                winner = %report.winner,
                prize = %report.prize,
                winner_balance = %report.winner_balance,
                state = %report.state,
                "Round settled"
            );
            Ok(())
        }
    }
}

fn print_networks(config: &RaffleConfig) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec![
        "Network",
        "Chain id",
        "Entrance fee (wei)",
        "Interval (s)",
        "Confirmations",
        "VRF coordinator",
        "RPC",
    ]);

    for profile in config.network_config().profiles() {
        table.add_row(vec![
            profile.name.clone(),
            profile.chain_id.to_string(),
            profile.entrance_fee.to_string(),
            profile.interval.to_string(),
            profile.block_confirmations.to_string(),
            profile
                .vrf_coordinator
                .map(|address| address.to_string())
                .unwrap_or_else(|| "mock".to_string()),
            profile
                .rpc_url
                .as_ref()
                .map(|url| url.to_string())
                .unwrap_or_else(|| "in-process".to_string()),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn deploy<C: Chain + Clone>(
    config: &RaffleConfig,
    chain: C,
    artifacts: ArtifactStore,
    tags: &[DeployTag],
) -> Result<()> {
    let deployments = config.deployments(chain, artifacts);
    let mut orchestrator =
        Orchestrator::new(config.network_config(), deployments, config.deploy_settings()?);

    match orchestrator.run(tags).await? {
        Some(outcome) => tracing::info!(
            raffle = %outcome.raffle.address,
            coordinator = %outcome.coordinator,
            subscription_id = %outcome.subscription_id,
            verification = ?outcome.verification,
            "Deployment complete"
        ),
        None => tracing::info!("Deployment scripts finished"),
    }

    Ok(())
}

async fn staging<C: Chain + Clone>(
    config: &RaffleConfig,
    chain: C,
    artifacts: ArtifactStore,
) -> Result<RoundReport> {
    let profile = config.profile()?;

    if profile.is_development() {
        let deployments = config.deployments(chain.clone(), artifacts);
        let mut orchestrator =
            Orchestrator::new(config.network_config(), deployments, config.deploy_settings()?);
        orchestrator.run(&[DeployTag::Mocks, DeployTag::Lottery]).await?;

        let harness = LocalHarness::from_deployments(orchestrator.deployments())?;
        let accounts = chain.accounts().await?;
        let entrants: Vec<_> = accounts.iter().skip(1).take(LOCAL_ENTRANTS).copied().collect();
        let fee = harness.raffle().get_entrance_fee().await?;

        tracing::info!(entrants = entrants.len(), %fee, "Playing a local round");
        return harness.run_round(&entrants, fee).await;
    }

    let deployments = config.deployments(chain.clone(), artifacts);
    let record = deployments
        .get(RAFFLE)
        .with_context(|| format!("Deploy the raffle to {} first", profile.name))?;

    let raffle = RaffleClient::new(chain, record.address)
        .with_confirmations(profile.block_confirmations);
    let fee = raffle.get_entrance_fee().await?;
    let timeout = Duration::from_secs(config.live_timeout_secs);

    tracing::info!(raffle = %record.address, %fee, ?timeout, "Playing a live round");
    LiveHarness::new(raffle).with_timeout(timeout).run_round(fee).await
}

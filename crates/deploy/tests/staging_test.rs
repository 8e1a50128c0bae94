//! Staging test against a live VRF oracle.
//!
//! Needs a raffle already deployed to Sepolia (`raffle deploy --network sepolia`)
//! and registered as a consumer of the configured subscription.
//! Run with:
//! RAFFLE_SEPOLIA_RPC_URL=... RAFFLE_PRIVATE_KEY=... cargo test --test staging_test -- --ignored

use std::time::Duration;

use anyhow::{Context, Result};
use raffle_deploy::{
    Chain, Connection, LiveHarness, RaffleClient, RaffleConfig, RaffleState, contracts::RAFFLE,
};
use url::Url;

/// Generous upper bound for the oracle callback and the confirmations.
const LIVE_ROUND_TIMEOUT_SECS: u64 = 300;

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init()
        .ok();
}

fn env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set for the staging test"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "needs a funded Sepolia account and a deployed raffle"]
async fn test_live_round_picks_winner() -> Result<()> {
    init_test_tracing();

    let rpc_url = Url::parse(&env("RAFFLE_SEPOLIA_RPC_URL")?)?;
    let config = RaffleConfig {
        network: "sepolia".to_string(),
        rpc_url: Some(rpc_url),
        private_key: Some(env("RAFFLE_PRIVATE_KEY")?),
        ..Default::default()
    };

    let connection = config.connect()?;
    let artifacts = config.artifacts(&connection);
    let Connection::Rpc(chain) = connection else {
        anyhow::bail!("Sepolia must be reached over JSON-RPC");
    };
    let profile = config.profile()?;
    let deployments = config.deployments(chain.clone(), artifacts);
    let record = deployments.get(RAFFLE)?;

    let raffle = RaffleClient::new(chain.clone(), record.address)
        .with_confirmations(profile.block_confirmations);
    let accounts = chain.accounts().await?;
    let player = accounts.first().copied().context("No signing account")?;
    let fee = raffle.get_entrance_fee().await?;

    let report = LiveHarness::new(raffle)
        .with_timeout(Duration::from_secs(LIVE_ROUND_TIMEOUT_SECS))
        .run_round(fee)
        .await?;

    report.check()?;
    assert_eq!(report.state, RaffleState::Open);
    assert_eq!(report.winner, player);
    assert!(report.end_timestamp > report.start_timestamp);

    // Sampled after entering, so only the upkeep gas is spent since.
    let starting_balance = report
        .winner_starting_balance
        .context("The player's balance was not sampled")?;
    assert_eq!(
        report.winner_balance,
        starting_balance + report.prize - report.winner_draw_fees
    );
    assert_eq!(chain.balance(player).await?, report.winner_balance);
    Ok(())
}

//! End-to-end raffle rounds.
//!
//! [`LocalHarness`] plays the oracle itself on development networks: it moves
//! the clock past the interval and calls the mock coordinator's
//! `fulfillRandomWords`. [`LiveHarness`] triggers the draw and waits for the
//! real oracle to call back, bounded by a timeout.

use std::time::Duration;

use alloy_core::{
    primitives::{Address, U256},
    sol_types::SolEvent,
};
use anyhow::{Context, Result};

use crate::{
    DeployError,
    chain::{Chain, Log, TxReceipt},
    contracts::{RAFFLE, Raffle, RaffleState, VRF_COORDINATOR_MOCK},
    deployments::Deployments,
    raffle::{CoordinatorClient, RaffleClient, decode_receipt_events, query_events},
    rpc::DEFAULT_POLL_INTERVAL,
};

/// How long the live round waits for the oracle.
pub const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of waiting for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome<E> {
    Observed { log: Log, event: E },
    TimedOut,
}

impl<E: SolEvent> EventOutcome<E> {
    /// The observed event, or [`DeployError::EventTimeout`].
    pub fn into_observed(self, timeout: Duration) -> Result<(Log, E)> {
        match self {
            EventOutcome::Observed { log, event } => Ok((log, event)),
            EventOutcome::TimedOut => Err(DeployError::EventTimeout {
                event: E::SIGNATURE,
                timeout_secs: timeout.as_secs(),
            }
            .into()),
        }
    }
}

/// Wait for the first `E` emitted by `address` at or after `from_block`.
///
/// Polls the chain every `poll_interval`. The deadline timer is dropped as
/// soon as the event shows up.
pub async fn wait_for_event<C: Chain, E: SolEvent>(
    chain: &C,
    address: Address,
    from_block: u64,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<EventOutcome<E>> {
    let poll = async {
        loop {
            let events = query_events::<C, E>(chain, address, from_block).await?;
            if let Some((log, event)) = events.into_iter().next() {
                return Ok::<_, anyhow::Error>((log, event));
            }

            tracing::trace!(event = E::SIGNATURE, from_block, "Event not seen yet");
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(Ok((log, event))) => {
            tracing::info!(event = E::SIGNATURE, block = log.block_number, "Event observed");
            Ok(EventOutcome::Observed { log, event })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            tracing::warn!(event = E::SIGNATURE, timeout = ?timeout, "Timed out waiting for event");
            Ok(EventOutcome::TimedOut)
        }
    }
}

/// Raffle state observed once a round has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// VRF request of the round, when the harness saw it.
    pub request_id: Option<U256>,
    pub winner: Address,
    pub state: RaffleState,
    pub players_left: U256,
    /// Whether `getPlayer(0)` reverted after the round.
    pub player_list_cleared: bool,
    /// Prize held by the raffle when the draw started.
    pub prize: U256,
    pub start_timestamp: U256,
    pub end_timestamp: U256,
    /// Balance of the winner once the round settled.
    pub winner_balance: U256,
    /// Balance of the winner after entering and before the draw. `None` when
    /// the winner is not an account the harness entered with.
    pub winner_starting_balance: Option<U256>,
    /// Fees the winner paid for draw transactions it sent itself.
    pub winner_draw_fees: U256,
}

impl RoundReport {
    /// Check the post-conditions of a settled round.
    pub fn check(&self) -> Result<()> {
        anyhow::ensure!(
            self.state == RaffleState::Open,
            "Raffle state not reset: {}",
            self.state
        );
        anyhow::ensure!(
            self.players_left.is_zero() && self.player_list_cleared,
            "Player list not cleared ({} left)",
            self.players_left
        );
        anyhow::ensure!(
            self.end_timestamp > self.start_timestamp,
            "Timestamp did not move forward ({} -> {})",
            self.start_timestamp,
            self.end_timestamp
        );
        anyhow::ensure!(self.winner != Address::ZERO, "No winner recorded");

        if let Some(starting) = self.winner_starting_balance {
            let expected = starting + self.prize - self.winner_draw_fees;
            anyhow::ensure!(
                self.winner_balance == expected,
                "Winner balance {} does not match {} + prize {} - fees {}",
                self.winner_balance,
                starting,
                self.prize,
                self.winner_draw_fees
            );
        }
        Ok(())
    }
}

/// What a harness observed between the entries and the payout.
struct Draw {
    request_id: Option<U256>,
    prize: U256,
    start_timestamp: U256,
    /// Entrant balances once everyone entered.
    starting_balances: Vec<(Address, U256)>,
    receipts: Vec<TxReceipt>,
}

async fn balances<C: Chain>(chain: &C, accounts: &[Address]) -> Result<Vec<(Address, U256)>> {
    let mut balances = Vec::with_capacity(accounts.len());
    for account in accounts {
        balances.push((*account, chain.balance(*account).await?));
    }
    Ok(balances)
}

async fn settled_report<C: Chain + Clone>(raffle: &RaffleClient<C>, draw: Draw) -> Result<RoundReport> {
    let player_list_cleared = match raffle.get_player(0).await {
        Ok(_) => false,
        Err(e) if crate::error::revert_data(&e).is_some() => true,
        Err(e) => return Err(e),
    };

    let winner = raffle.get_recent_winner().await?;
    let winner_starting_balance = draw
        .starting_balances
        .iter()
        .find(|(account, _)| *account == winner)
        .map(|(_, balance)| *balance);
    let winner_draw_fees = draw
        .receipts
        .iter()
        .filter(|receipt| receipt.from == winner)
        .fold(U256::ZERO, |fees, receipt| fees + receipt.fee());

    Ok(RoundReport {
        request_id: draw.request_id,
        winner,
        state: raffle.get_raffle_state().await?,
        players_left: raffle.get_number_of_players().await?,
        player_list_cleared,
        prize: draw.prize,
        start_timestamp: draw.start_timestamp,
        end_timestamp: raffle.get_last_timestamp().await?,
        winner_balance: raffle.chain().balance(winner).await?,
        winner_starting_balance,
        winner_draw_fees,
    })
}

/// Drives rounds on a development network with the mock coordinator.
#[derive(Debug, Clone)]
pub struct LocalHarness<C> {
    raffle: RaffleClient<C>,
    coordinator: CoordinatorClient<C>,
}

impl<C: Chain + Clone> LocalHarness<C> {
    pub fn new(raffle: RaffleClient<C>, coordinator: CoordinatorClient<C>) -> Self {
        Self {
            raffle,
            coordinator,
        }
    }

    /// Harness over the raffle and mock recorded in `deployments`.
    pub fn from_deployments(deployments: &Deployments<C>) -> Result<Self> {
        let raffle = deployments.get(RAFFLE)?;
        let coordinator = deployments.get(VRF_COORDINATOR_MOCK)?;
        let chain = deployments.chain().clone();

        Ok(Self::new(
            RaffleClient::new(chain.clone(), raffle.address),
            CoordinatorClient::new(chain, coordinator.address),
        ))
    }

    pub fn raffle(&self) -> &RaffleClient<C> {
        &self.raffle
    }

    pub fn coordinator(&self) -> &CoordinatorClient<C> {
        &self.coordinator
    }

    /// Move the clock one second past the raffle interval and mine a block.
    pub async fn advance_past_interval(&self) -> Result<()> {
        let interval = self.raffle.get_interval().await?;
        let seconds = u64::try_from(interval).context("Raffle interval does not fit in u64")? + 1;
        self.advance_time(seconds).await
    }

    pub async fn advance_time(&self, seconds: u64) -> Result<()> {
        let chain = self.raffle.chain();
        chain.increase_time(seconds).await?;
        chain.mine().await?;
        tracing::debug!(seconds, "Clock advanced");
        Ok(())
    }

    /// `performUpkeep`, returning the request id of `RequestedRaffleWinner`.
    pub async fn request_winner(&self) -> Result<U256> {
        self.send_request().await.map(|(request_id, _)| request_id)
    }

    /// Deliver the random words of `request_id` and return the winner.
    pub async fn fulfill(&self, request_id: U256) -> Result<Address> {
        self.send_fulfillment(request_id).await.map(|(winner, _)| winner)
    }

    async fn send_request(&self) -> Result<(U256, TxReceipt)> {
        let receipt = self.raffle.perform_upkeep().await?;
        let requested = decode_receipt_events::<Raffle::RequestedRaffleWinner>(
            &receipt,
            self.raffle.address(),
        )?;

        let request_id = requested
            .first()
            .map(|event| event.requestId)
            .context("performUpkeep emitted no RequestedRaffleWinner")?;
        Ok((request_id, receipt))
    }

    async fn send_fulfillment(&self, request_id: U256) -> Result<(Address, TxReceipt)> {
        let receipt = self
            .coordinator
            .fulfill_random_words(request_id, self.raffle.address())
            .await?;
        let picked =
            decode_receipt_events::<Raffle::WinnerPicked>(&receipt, self.raffle.address())?;

        let winner = picked
            .first()
            .map(|event| event.player)
            .context("Fulfillment did not pick a winner")?;
        Ok((winner, receipt))
    }

    /// Full round: every entrant pays `value`, the interval elapses, upkeep
    /// requests randomness and the mock answers.
    pub async fn run_round(&self, entrants: &[Address], value: U256) -> Result<RoundReport> {
        let start_timestamp = self.raffle.get_last_timestamp().await?;

        for entrant in entrants {
            self.raffle.connect(*entrant).enter_raffle(value).await?;
            tracing::debug!(%entrant, "Entered raffle");
        }

        let starting_balances = balances(self.raffle.chain(), entrants).await?;
        self.advance_past_interval().await?;
        let prize = self.raffle.get_balance().await?;
        let (request_id, upkeep) = self.send_request().await?;
        let (winner, fulfillment) = self.send_fulfillment(request_id).await?;

        let draw = Draw {
            request_id: Some(request_id),
            prize,
            start_timestamp,
            starting_balances,
            receipts: vec![upkeep, fulfillment],
        };
        let report = settled_report(&self.raffle, draw).await?;
        anyhow::ensure!(
            report.winner == winner,
            "Recent winner {} differs from WinnerPicked {}",
            report.winner,
            winner
        );

        tracing::info!(%winner, %prize, %request_id, "Round settled");
        Ok(report)
    }
}

/// Drives a round against a live oracle.
#[derive(Debug, Clone)]
pub struct LiveHarness<C> {
    raffle: RaffleClient<C>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<C: Chain + Clone> LiveHarness<C> {
    pub fn new(raffle: RaffleClient<C>) -> Self {
        Self {
            raffle,
            timeout: DEFAULT_LIVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn raffle(&self) -> &RaffleClient<C> {
        &self.raffle
    }

    /// Enter with `value`, trigger the draw and wait for `WinnerPicked`.
    ///
    /// The entrant's balance is sampled right after entering, so the report
    /// can tell whether the prize reached the winner.
    /// Fails with [`DeployError::EventTimeout`] when the oracle does not
    /// answer in time.
    pub async fn run_round(&self, value: U256) -> Result<RoundReport> {
        let chain = self.raffle.chain();
        let start_timestamp = self.raffle.get_last_timestamp().await?;

        let entry = self.raffle.enter_raffle(value).await?;
        let starting_balances = balances(chain, &[entry.from]).await?;
        tracing::info!(%value, player = %entry.from, "Entered raffle, triggering upkeep");

        let from_block = chain.block_number().await?;
        let prize = self.raffle.get_balance().await?;
        let upkeep = self.raffle.perform_upkeep().await?;

        let (log, event) = wait_for_event::<C, Raffle::WinnerPicked>(
            chain,
            self.raffle.address(),
            from_block,
            self.timeout,
            self.poll_interval,
        )
        .await?
        .into_observed(self.timeout)?;

        tracing::info!(winner = %event.player, tx_hash = %log.transaction_hash, "Winner picked");
        let draw = Draw {
            request_id: None,
            prize,
            start_timestamp,
            starting_balances,
            receipts: vec![upkeep],
        };
        settled_report(&self.raffle, draw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::NetworkConfig,
        orchestrator::{DeployTag, DeploySettings, Orchestrator},
        sim::{DEFAULT_ACCOUNTS, SimulatedChain},
    };

    async fn deployed() -> Deployments<SimulatedChain> {
        let chain = SimulatedChain::new();
        let deployments = Deployments::new(chain.clone(), "hardhat", chain.artifacts());
        let mut orchestrator =
            Orchestrator::new(NetworkConfig::default(), deployments, DeploySettings::default());
        orchestrator.run(&[DeployTag::All]).await.unwrap();
        orchestrator.into_deployments()
    }

    #[tokio::test]
    async fn test_wait_for_event_times_out() {
        let deployments = deployed().await;
        let raffle = deployments.get(RAFFLE).unwrap();

        let outcome = wait_for_event::<_, Raffle::WinnerPicked>(
            deployments.chain(),
            raffle.address,
            0,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(outcome, EventOutcome::TimedOut);
        let err = outcome.into_observed(Duration::from_secs(120)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::EventTimeout { timeout_secs: 120, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_event_observes_past_logs() {
        let deployments = deployed().await;
        let harness = LocalHarness::from_deployments(&deployments).unwrap();
        let from_block = deployments.chain().block_number().await.unwrap();

        harness
            .raffle()
            .connect(DEFAULT_ACCOUNTS[1])
            .enter_raffle(U256::from(10u64).pow(U256::from(17)))
            .await
            .unwrap();

        let outcome = wait_for_event::<_, Raffle::RaffleEnter>(
            deployments.chain(),
            harness.raffle().address(),
            from_block,
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        let (_, event) = outcome.into_observed(Duration::from_secs(5)).unwrap();
        assert_eq!(event.player, DEFAULT_ACCOUNTS[1]);
    }

    #[tokio::test]
    async fn test_local_round_report() {
        let deployments = deployed().await;
        let harness = LocalHarness::from_deployments(&deployments).unwrap();
        let fee = harness.raffle().get_entrance_fee().await.unwrap();

        let report = harness
            .run_round(&DEFAULT_ACCOUNTS[1..4], fee)
            .await
            .unwrap();

        report.check().unwrap();
        assert_eq!(report.prize, fee * U256::from(3));
        assert!(DEFAULT_ACCOUNTS[1..4].contains(&report.winner));
        assert_eq!(report.request_id, Some(U256::from(1)));
        // Entrants do not send the draw transactions.
        assert!(report.winner_draw_fees.is_zero());
        assert_eq!(
            report.winner_balance,
            report.winner_starting_balance.unwrap() + report.prize
        );
    }

    #[tokio::test]
    async fn test_live_round_tracks_winner_balance() {
        let deployments = deployed().await;
        let harness = LocalHarness::from_deployments(&deployments).unwrap();
        let chain = deployments.chain().clone();
        let player = DEFAULT_ACCOUNTS[1];
        let raffle = harness.raffle().connect(player);
        let fee = raffle.get_entrance_fee().await.unwrap();

        // Stand in for the oracle: answer the first request once it shows up.
        let oracle = harness.clone();
        let responder = tokio::spawn(async move {
            loop {
                if oracle.raffle().get_raffle_state().await? == RaffleState::Calculating {
                    return oracle.fulfill(U256::from(1)).await;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        chain.increase_time(61).await.unwrap();
        let report = LiveHarness::new(raffle)
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(10))
            .run_round(fee)
            .await
            .unwrap();

        assert_eq!(responder.await.unwrap().unwrap(), player);
        report.check().unwrap();
        assert_eq!(report.winner, player);
        assert_eq!(report.prize, fee);
        let starting = report.winner_starting_balance.unwrap();
        assert_eq!(report.winner_balance, starting + fee);
    }

    #[test]
    fn test_report_check_flags_open_round() {
        let report = RoundReport {
            request_id: None,
            winner: Address::repeat_byte(1),
            state: RaffleState::Calculating,
            players_left: U256::ZERO,
            player_list_cleared: true,
            prize: U256::ZERO,
            start_timestamp: U256::from(1),
            end_timestamp: U256::from(2),
            winner_balance: U256::ZERO,
            winner_starting_balance: None,
            winner_draw_fees: U256::ZERO,
        };

        assert!(report.check().is_err());
        assert!(RoundReport {
            state: RaffleState::Open,
            ..report.clone()
        }
        .check()
        .is_ok());
    }

    #[test]
    fn test_report_check_flags_missing_prize() {
        let report = RoundReport {
            request_id: None,
            winner: Address::repeat_byte(1),
            state: RaffleState::Open,
            players_left: U256::ZERO,
            player_list_cleared: true,
            prize: U256::from(100),
            start_timestamp: U256::from(1),
            end_timestamp: U256::from(2),
            winner_balance: U256::from(1_000),
            winner_starting_balance: Some(U256::from(1_000)),
            winner_draw_fees: U256::from(5),
        };

        assert!(report.check().is_err());
        assert!(RoundReport {
            winner_balance: U256::from(1_095),
            ..report
        }
        .check()
        .is_ok());
    }
}

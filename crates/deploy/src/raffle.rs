//! Typed clients for the raffle and the mock coordinator.
//!
//! Both clients wrap a [`Chain`] and a contract address. Reads go through
//! `eth_call`, writes are sent and awaited for the client's confirmation count.
//! A revert surfaces as [`crate::DeployError::Reverted`]; match its payload
//! with [`crate::error::is_revert_of`].

use alloy_core::{
    primitives::{Address, U256, aliases::U96, ruint::UintTryFrom},
    sol_types::{SolCall, SolEvent},
};
use anyhow::{Context, Result};

use crate::{
    chain::{Chain, Log, LogFilter, TxReceipt, TxRequest, send_and_confirm},
    contracts::{Raffle, RaffleState, VRFCoordinatorV2Mock, mock_subscription_id},
};

/// Decode every `E` emitted by `address` in `receipt`.
pub fn decode_receipt_events<E: SolEvent>(receipt: &TxReceipt, address: Address) -> Result<Vec<E>> {
    receipt
        .logs_matching(address, E::SIGNATURE_HASH)
        .map(decode_log::<E>)
        .collect()
}

/// Decode one log as `E`.
pub fn decode_log<E: SolEvent>(log: &Log) -> Result<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data)
        .with_context(|| format!("Failed to decode {} log", E::SIGNATURE))
}

/// All `E` logs emitted by `address` from `from_block` on.
pub async fn query_events<C: Chain, E: SolEvent>(
    chain: &C,
    address: Address,
    from_block: u64,
) -> Result<Vec<(Log, E)>> {
    let logs = chain
        .logs(LogFilter {
            address,
            topic0: E::SIGNATURE_HASH,
            from_block,
        })
        .await?;

    logs.into_iter()
        .map(|log| decode_log::<E>(&log).map(|event| (log, event)))
        .collect()
}

/// Shared plumbing of the typed clients.
#[derive(Debug, Clone)]
struct ContractHandle<C> {
    chain: C,
    address: Address,
    sender: Option<Address>,
    confirmations: u64,
}

impl<C: Chain> ContractHandle<C> {
    async fn read<T: SolCall>(&self, call: T) -> Result<T::Return> {
        let mut tx = TxRequest::call(self.address, call.abi_encode());
        tx.from = self.sender;

        let output = self.chain.call(tx).await?;
        T::abi_decode_returns(&output)
            .with_context(|| format!("Failed to decode return of {}", T::SIGNATURE))
    }

    async fn send<T: SolCall>(&self, call: T, value: U256) -> Result<TxReceipt> {
        let mut tx = TxRequest::call(self.address, call.abi_encode()).value(value);
        tx.from = self.sender;

        tracing::debug!(
            contract = %self.address,
            function = T::SIGNATURE,
            %value,
            "Sending contract transaction"
        );

        send_and_confirm(&self.chain, tx, self.confirmations).await
    }
}

/// Client of a deployed `Raffle`.
#[derive(Debug, Clone)]
pub struct RaffleClient<C> {
    handle: ContractHandle<C>,
}

impl<C: Chain + Clone> RaffleClient<C> {
    pub fn new(chain: C, address: Address) -> Self {
        Self {
            handle: ContractHandle {
                chain,
                address,
                sender: None,
                confirmations: 1,
            },
        }
    }

    /// A client sending from `account` instead of the default account.
    pub fn connect(&self, account: Address) -> Self {
        let mut client = self.clone();
        client.handle.sender = Some(account);
        client
    }

    /// Confirmations awaited after each transaction.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.handle.confirmations = confirmations;
        self
    }

    pub fn address(&self) -> Address {
        self.handle.address
    }

    pub fn chain(&self) -> &C {
        &self.handle.chain
    }

    pub async fn enter_raffle(&self, value: U256) -> Result<TxReceipt> {
        self.handle.send(Raffle::enterRaffleCall {}, value).await
    }

    pub async fn check_upkeep(&self) -> Result<bool> {
        self.handle.read(Raffle::checkUpkeepCall {}).await
    }

    pub async fn perform_upkeep(&self) -> Result<TxReceipt> {
        self.handle.send(Raffle::performUpkeepCall {}, U256::ZERO).await
    }

    pub async fn get_player(&self, index: u64) -> Result<Address> {
        self.handle
            .read(Raffle::getPlayerCall {
                index: U256::from(index),
            })
            .await
    }

    pub async fn get_all_players(&self) -> Result<Vec<Address>> {
        self.handle.read(Raffle::getAllPlayersCall {}).await
    }

    pub async fn get_number_of_players(&self) -> Result<U256> {
        self.handle.read(Raffle::getNumberOfPlayersCall {}).await
    }

    pub async fn get_recent_winner(&self) -> Result<Address> {
        self.handle.read(Raffle::getRecentWinnerCall {}).await
    }

    pub async fn get_raffle_state(&self) -> Result<RaffleState> {
        let code = self.handle.read(Raffle::getRaffleStateCall {}).await?;
        RaffleState::from_u8(code).with_context(|| format!("Unknown raffle state {}", code))
    }

    pub async fn get_last_timestamp(&self) -> Result<U256> {
        self.handle.read(Raffle::getLastTimeStampCall {}).await
    }

    pub async fn get_interval(&self) -> Result<U256> {
        self.handle.read(Raffle::getIntervalCall {}).await
    }

    pub async fn get_entrance_fee(&self) -> Result<U256> {
        self.handle.read(Raffle::getEntranceFeeCall {}).await
    }

    pub async fn get_balance(&self) -> Result<U256> {
        self.handle.read(Raffle::getBalanceCall {}).await
    }
}

/// Subscription as reported by the mock coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub balance: U256,
    pub request_count: u64,
    pub owner: Address,
    pub consumers: Vec<Address>,
}

/// Client of a deployed `VRFCoordinatorV2Mock`.
#[derive(Debug, Clone)]
pub struct CoordinatorClient<C> {
    handle: ContractHandle<C>,
}

impl<C: Chain + Clone> CoordinatorClient<C> {
    pub fn new(chain: C, address: Address) -> Self {
        Self {
            handle: ContractHandle {
                chain,
                address,
                sender: None,
                confirmations: 1,
            },
        }
    }

    pub fn connect(&self, account: Address) -> Self {
        let mut client = self.clone();
        client.handle.sender = Some(account);
        client
    }

    pub fn address(&self) -> Address {
        self.handle.address
    }

    pub async fn create_subscription(&self) -> Result<TxReceipt> {
        self.handle
            .send(VRFCoordinatorV2Mock::createSubscriptionCall {}, U256::ZERO)
            .await
    }

    /// Fund `subscription_id` with `amount` LINK (wei units, at most uint96).
    pub async fn fund_subscription(&self, subscription_id: U256, amount: U256) -> Result<TxReceipt> {
        let amount = U96::uint_try_from(amount)
            .with_context(|| format!("Funding amount {} does not fit in uint96", amount))?;

        self.handle
            .send(
                VRFCoordinatorV2Mock::fundSubscriptionCall {
                    subId: mock_subscription_id(subscription_id)?,
                    amount,
                },
                U256::ZERO,
            )
            .await
    }

    pub async fn add_consumer(&self, subscription_id: U256, consumer: Address) -> Result<TxReceipt> {
        self.handle
            .send(
                VRFCoordinatorV2Mock::addConsumerCall {
                    subId: mock_subscription_id(subscription_id)?,
                    consumer,
                },
                U256::ZERO,
            )
            .await
    }

    pub async fn consumer_is_added(&self, subscription_id: U256, consumer: Address) -> Result<bool> {
        self.handle
            .read(VRFCoordinatorV2Mock::consumerIsAddedCall {
                subId: mock_subscription_id(subscription_id)?,
                consumer,
            })
            .await
    }

    /// Deliver the random words of `request_id` to `consumer`.
    pub async fn fulfill_random_words(&self, request_id: U256, consumer: Address) -> Result<TxReceipt> {
        self.handle
            .send(
                VRFCoordinatorV2Mock::fulfillRandomWordsCall {
                    requestId: request_id,
                    consumer,
                },
                U256::ZERO,
            )
            .await
    }

    pub async fn get_subscription(&self, subscription_id: U256) -> Result<SubscriptionInfo> {
        let subscription = self
            .handle
            .read(VRFCoordinatorV2Mock::getSubscriptionCall {
                subId: mock_subscription_id(subscription_id)?,
            })
            .await?;

        Ok(SubscriptionInfo {
            balance: U256::from(subscription.balance),
            request_count: subscription.reqCount,
            owner: subscription.owner,
            consumers: subscription.consumers,
        })
    }
}

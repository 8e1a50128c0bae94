//! Mock VRF coordinator and subscription provisioning for development networks.

use std::collections::{BTreeMap, BTreeSet};

use alloy_core::{
    primitives::{Address, U256},
    sol_types::SolEvent,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    DeployError,
    chain::{Chain, Log},
    contracts::{CoordinatorConstructorArgs, VRF_COORDINATOR_MOCK, VRFCoordinatorV2Mock},
    deployments::{DeployOptions, Deployments},
    raffle::CoordinatorClient,
};

const ONE_LINK: u128 = 1_000_000_000_000_000_000;

/// Flat fee charged per fulfillment: 0.25 LINK.
pub const DEFAULT_BASE_FEE: U256 = U256::from_limbs([(ONE_LINK / 4) as u64, 0, 0, 0]);

/// LINK per gas charged for the callback: 1 gwei.
pub const DEFAULT_GAS_PRICE_LINK: U256 = U256::from_limbs([1_000_000_000, 0, 0, 0]);

/// Initial funding of a fresh subscription: 0.5 LINK.
pub const DEFAULT_FUND_AMOUNT: U256 = U256::from_limbs([(ONE_LINK / 2) as u64, 0, 0, 0]);

/// Where the subscription id sits in the `SubscriptionCreated` log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum SubscriptionIdLocation {
    /// Topic at this index; topic 0 is the event signature.
    Topic(usize),
    /// 32-byte word at this index of the data section.
    Data(usize),
}

impl Default for SubscriptionIdLocation {
    /// `subId` is the first indexed argument.
    fn default() -> Self {
        SubscriptionIdLocation::Topic(1)
    }
}

impl SubscriptionIdLocation {
    pub fn extract(&self, log: &Log) -> Result<U256> {
        match *self {
            SubscriptionIdLocation::Topic(index) => log
                .topics
                .get(index)
                .map(|topic| U256::from_be_bytes(topic.0))
                .with_context(|| format!("Subscription log has no topic {}", index)),
            SubscriptionIdLocation::Data(index) => log
                .data
                .chunks_exact(32)
                .nth(index)
                .map(U256::from_be_slice)
                .with_context(|| format!("Subscription log has no data word {}", index)),
        }
    }
}

/// A subscription created by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: U256,
    /// Coordinator the subscription lives on.
    pub coordinator: Address,
    /// Total LINK funded through this provisioner.
    pub funded: U256,
    pub consumers: BTreeSet<Address>,
}

/// Deploys the mock coordinator and manages its subscriptions.
#[derive(Debug, Clone, Default)]
pub struct MockOracleProvisioner {
    id_location: SubscriptionIdLocation,
    coordinator: Option<Address>,
    subscriptions: BTreeMap<U256, SubscriptionHandle>,
}

impl MockOracleProvisioner {
    pub fn new(id_location: SubscriptionIdLocation) -> Self {
        Self {
            id_location,
            ..Default::default()
        }
    }

    /// The coordinator deployed by this provisioner, if any.
    pub fn coordinator(&self) -> Option<Address> {
        self.coordinator
    }

    pub fn subscription(&self, id: U256) -> Option<&SubscriptionHandle> {
        self.subscriptions.get(&id)
    }

    fn known_subscription(&mut self, id: U256) -> Result<&mut SubscriptionHandle> {
        self.subscriptions
            .get_mut(&id)
            .ok_or_else(|| DeployError::UnknownSubscription { subscription_id: id }.into())
    }

    /// Deploy `VRFCoordinatorV2Mock`. Later calls return the first deployment.
    pub async fn deploy_mock_coordinator<C: Chain>(
        &mut self,
        deployments: &mut Deployments<C>,
        base_fee: U256,
        gas_price_link: U256,
    ) -> Result<Address> {
        if let Some(coordinator) = self.coordinator {
            tracing::debug!(%coordinator, "Mock coordinator already deployed");
            return Ok(coordinator);
        }

        tracing::info!(network = deployments.network(), "Local network detected, deploying mocks...");

        let args = CoordinatorConstructorArgs {
            base_fee,
            gas_price_link,
        };
        let record = deployments
            .deploy(
                VRF_COORDINATOR_MOCK,
                DeployOptions {
                    args: args.abi_encode(),
                    wait_confirmations: 1,
                    ..Default::default()
                },
            )
            .await?;

        self.coordinator = Some(record.address);
        tracing::info!(address = %record.address, "Mocks deployed");
        Ok(record.address)
    }

    /// Adopt a coordinator deployed earlier (e.g. by a previous `mocks` run).
    pub fn adopt_coordinator(&mut self, coordinator: Address) {
        self.coordinator.get_or_insert(coordinator);
    }

    /// Create a subscription on `coordinator` and return its id.
    pub async fn create_subscription<C: Chain + Clone>(
        &mut self,
        chain: &C,
        coordinator: Address,
    ) -> Result<U256> {
        let client = CoordinatorClient::new(chain.clone(), coordinator);
        let receipt = client
            .create_subscription()
            .await
            .context("Failed to create VRF subscription")?;

        let log = receipt
            .logs_matching(coordinator, VRFCoordinatorV2Mock::SubscriptionCreated::SIGNATURE_HASH)
            .next()
            .context("createSubscription emitted no SubscriptionCreated log")?;
        let id = self.id_location.extract(log)?;

        tracing::info!(subscription_id = %id, %coordinator, "VRF subscription created");

        self.subscriptions.insert(
            id,
            SubscriptionHandle {
                id,
                coordinator,
                funded: U256::ZERO,
                consumers: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    /// Fund a subscription created by this provisioner.
    pub async fn fund_subscription<C: Chain + Clone>(
        &mut self,
        chain: &C,
        id: U256,
        amount: U256,
    ) -> Result<()> {
        let handle = self.known_subscription(id)?;
        CoordinatorClient::new(chain.clone(), handle.coordinator)
            .fund_subscription(id, amount)
            .await
            .with_context(|| format!("Failed to fund subscription {}", id))?;

        handle.funded += amount;
        tracing::info!(subscription_id = %id, %amount, "VRF subscription funded");
        Ok(())
    }

    /// Register `consumer` on a subscription created by this provisioner.
    pub async fn add_consumer<C: Chain + Clone>(
        &mut self,
        chain: &C,
        id: U256,
        consumer: Address,
    ) -> Result<()> {
        let handle = self.known_subscription(id)?;
        CoordinatorClient::new(chain.clone(), handle.coordinator)
            .add_consumer(id, consumer)
            .await
            .with_context(|| format!("Failed to add consumer {} to subscription {}", consumer, id))?;

        handle.consumers.insert(consumer);
        tracing::info!(subscription_id = %id, %consumer, "Consumer added");
        Ok(())
    }
}

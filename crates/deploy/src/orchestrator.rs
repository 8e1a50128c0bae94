//! Deployment workflow.
//!
//! One [`Orchestrator`] drives every network: configuration decides whether
//! the mock coordinator is provisioned (development) or the live coordinator
//! is used and the source verified (public). Scripts are selected by
//! [`DeployTag`] and run in a fixed order: mocks, lottery, frontend.

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};

use crate::{
    DeployError,
    chain::Chain,
    contracts::{RAFFLE, RaffleConstructorArgs, VRF_COORDINATOR_MOCK},
    deployments::{DeployOptions, DeploymentRecord, Deployments},
    exporter::{FrontendExporter, FrontendPaths},
    network::{NetworkConfig, NetworkProfile},
    provisioner::{
        DEFAULT_BASE_FEE, DEFAULT_FUND_AMOUNT, DEFAULT_GAS_PRICE_LINK, MockOracleProvisioner,
        SubscriptionIdLocation,
    },
    verify::{BuildInfo, EtherscanVerifier, VerificationOutcome, VerificationRequest},
};

/// Selects which deployment scripts run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeployTag {
    All,
    Mocks,
    Lottery,
    Frontend,
}

impl DeployTag {
    /// Whether a script tagged `script` runs when `self` is requested.
    pub fn selects(self, script: DeployTag) -> bool {
        self == DeployTag::All || self == script
    }
}

/// Knobs of a deployment run.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub base_fee: U256,
    pub gas_price_link: U256,
    pub fund_amount: U256,
    pub id_location: SubscriptionIdLocation,
    /// Overrides the profile's confirmation count.
    pub block_confirmations: Option<u64>,
    pub update_frontend: bool,
    pub frontend: FrontendPaths,
    /// Source verification on public networks. Skipped when unset.
    pub verifier: Option<EtherscanVerifier>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            base_fee: DEFAULT_BASE_FEE,
            gas_price_link: DEFAULT_GAS_PRICE_LINK,
            fund_amount: DEFAULT_FUND_AMOUNT,
            id_location: SubscriptionIdLocation::default(),
            block_confirmations: None,
            update_frontend: false,
            frontend: FrontendPaths::default(),
            verifier: None,
        }
    }
}

/// Result of the lottery script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOutcome {
    pub raffle: DeploymentRecord,
    pub coordinator: Address,
    pub subscription_id: U256,
    /// `None` on development networks or when verification was skipped.
    pub verification: Option<VerificationOutcome>,
}

/// Runs the deployment scripts against one network.
#[derive(Debug)]
pub struct Orchestrator<C> {
    networks: NetworkConfig,
    deployments: Deployments<C>,
    provisioner: MockOracleProvisioner,
    settings: DeploySettings,
}

impl<C: Chain + Clone> Orchestrator<C> {
    pub fn new(networks: NetworkConfig, deployments: Deployments<C>, settings: DeploySettings) -> Self {
        Self {
            networks,
            deployments,
            provisioner: MockOracleProvisioner::new(settings.id_location),
            settings,
        }
    }

    pub fn deployments(&self) -> &Deployments<C> {
        &self.deployments
    }

    pub fn provisioner(&self) -> &MockOracleProvisioner {
        &self.provisioner
    }

    pub fn into_deployments(self) -> Deployments<C> {
        self.deployments
    }

    fn is_development(&self) -> bool {
        crate::network::is_development_network(self.deployments.network())
    }

    /// Profile of the active network, checked against the connected chain.
    async fn resolve_profile(&self) -> Result<NetworkProfile> {
        let network = self.deployments.network();
        let mut profile = self
            .networks
            .by_name(network)
            .with_context(|| format!("Cannot deploy to {network}"))?
            .clone();

        let chain_id = self.deployments.chain().chain_id().await?;
        if chain_id != profile.chain_id {
            return Err(DeployError::ChainIdMismatch {
                network: network.to_string(),
                expected: profile.chain_id,
                actual: chain_id,
            }
            .into());
        }

        if let Some(confirmations) = self.settings.block_confirmations {
            profile.block_confirmations = confirmations;
        }
        Ok(profile)
    }

    /// Run every script selected by `tags`, in order.
    pub async fn run(&mut self, tags: &[DeployTag]) -> Result<Option<DeploymentOutcome>> {
        let selected = |script| tags.iter().any(|tag| tag.selects(script));
        let mut outcome = None;

        if selected(DeployTag::Mocks) {
            self.deploy_mocks().await?;
        }
        if selected(DeployTag::Lottery) {
            outcome = Some(self.deploy_lottery().await?);
        }
        if selected(DeployTag::Frontend) {
            self.update_frontend().await?;
        }

        Ok(outcome)
    }

    /// Deploy the mock coordinator on development networks. No-op elsewhere.
    pub async fn deploy_mocks(&mut self) -> Result<Option<Address>> {
        if !self.is_development() {
            tracing::debug!(network = self.deployments.network(), "Public network, no mocks needed");
            return Ok(None);
        }

        let coordinator = self
            .provisioner
            .deploy_mock_coordinator(
                &mut self.deployments,
                self.settings.base_fee,
                self.settings.gas_price_link,
            )
            .await?;
        Ok(Some(coordinator))
    }

    /// Coordinator and funded subscription of a development network.
    async fn provision_oracle(&mut self) -> Result<(Address, U256)> {
        let coordinator = match self.provisioner.coordinator() {
            Some(coordinator) => coordinator,
            None => match self.deployments.try_get(VRF_COORDINATOR_MOCK)? {
                Some(record) => {
                    self.provisioner.adopt_coordinator(record.address);
                    record.address
                }
                None => self
                    .deploy_mocks()
                    .await?
                    .context("Mock coordinator was not deployed")?,
            },
        };

        let chain = self.deployments.chain().clone();
        let subscription_id = self.provisioner.create_subscription(&chain, coordinator).await?;
        self.provisioner
            .fund_subscription(&chain, subscription_id, self.settings.fund_amount)
            .await?;

        Ok((coordinator, subscription_id))
    }

    /// Deploy the raffle and wire it to the VRF coordinator.
    pub async fn deploy_lottery(&mut self) -> Result<DeploymentOutcome> {
        let profile = self.resolve_profile().await?;
        let development = self.is_development();

        let (coordinator, subscription_id) = if development {
            self.provision_oracle().await?
        } else {
            let coordinator = profile.vrf_coordinator.ok_or_else(|| {
                DeployError::MissingOracleBinding {
                    network: profile.name.clone(),
                    missing: "coordinator address",
                }
            })?;
            let subscription_id = profile.subscription_id.ok_or_else(|| {
                DeployError::MissingOracleBinding {
                    network: profile.name.clone(),
                    missing: "subscription id",
                }
            })?;
            (coordinator, subscription_id)
        };

        let args = RaffleConstructorArgs {
            vrf_coordinator: coordinator,
            entrance_fee: profile.entrance_fee,
            subscription_id,
            callback_gas_limit: profile.callback_gas_limit,
            gas_lane: profile.gas_lane,
            interval: U256::from(profile.interval),
        };

        tracing::info!(
            network = %profile.name,
            chain_id = profile.chain_id,
            %coordinator,
            %subscription_id,
            confirmations = profile.block_confirmations,
            "Deploying raffle..."
        );

        let raffle = self
            .deployments
            .deploy(
                RAFFLE,
                DeployOptions {
                    args: args.abi_encode(),
                    wait_confirmations: profile.block_confirmations,
                    ..Default::default()
                },
            )
            .await?;

        let verification = if development {
            let chain = self.deployments.chain().clone();
            self.provisioner
                .add_consumer(&chain, subscription_id, raffle.address)
                .await?;
            None
        } else {
            self.verify(&raffle).await?
        };

        Ok(DeploymentOutcome {
            raffle,
            coordinator,
            subscription_id,
            verification,
        })
    }

    async fn verify(&self, raffle: &DeploymentRecord) -> Result<Option<VerificationOutcome>> {
        let Some(verifier) = &self.settings.verifier else {
            tracing::warn!(
                address = %raffle.address,
                "No explorer API key configured, skipping verification"
            );
            return Ok(None);
        };

        let artifact = self.deployments.artifacts().load(&raffle.contract_name)?;
        let contract_name = artifact
            .source_name
            .with_context(|| format!("Artifact of {} has no source name", raffle.contract_name))?;
        let source_path = contract_name
            .split_once(':')
            .map_or(contract_name.as_str(), |(path, _)| path);
        let artifacts_root = self
            .deployments
            .artifacts()
            .root()
            .context("Verification needs compiled artifacts on disk")?;

        let request = VerificationRequest {
            address: raffle.address,
            build_info: BuildInfo::find(artifacts_root, source_path)?,
            contract_name: contract_name.clone(),
            constructor_args: raffle.args.clone(),
        };

        verifier.verify(&request).await.map(Some)
    }

    /// Export the raffle address and ABI to the frontend when enabled.
    pub async fn update_frontend(&self) -> Result<()> {
        if !self.settings.update_frontend {
            tracing::debug!("Frontend update disabled");
            return Ok(());
        }

        tracing::info!("Updating frontend...");
        let raffle = self.deployments.get(RAFFLE)?;
        let chain_id = self.deployments.chain().chain_id().await?;

        let exporter = FrontendExporter::new(self.settings.frontend.clone());
        exporter.export_address(chain_id, raffle.address)?;
        exporter.export_abi(&raffle.abi)?;
        Ok(())
    }
}

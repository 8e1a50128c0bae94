//! Named contract deployments.
//!
//! [`Deployments`] deploys artifacts by name, waits for the requested number
//! of confirmations and remembers the result as a [`DeploymentRecord`] so
//! later steps (consumer registration, verification, frontend export, tests)
//! can look contracts up by name. Records of persistent networks are also
//! written to `<dir>/<network>/<Name>.json`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    ArtifactStore, DeployError,
    chain::{Chain, TxRequest},
};

/// Outcome of deploying one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub address: Address,
    /// ABI-encoded constructor arguments.
    pub args: Bytes,
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Confirmations waited for before the deployment was recorded.
    pub confirmations: u64,
    pub deployer: Address,
    pub abi: JsonAbi,
}

/// Options of a single deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Sender; the first account of the chain when unset.
    pub from: Option<Address>,
    /// ABI-encoded constructor arguments.
    pub args: Bytes,
    pub wait_confirmations: u64,
}

/// Deploys contracts and keeps their records by name.
#[derive(Debug, Clone)]
pub struct Deployments<C> {
    chain: C,
    network: String,
    artifacts: ArtifactStore,
    records: BTreeMap<String, DeploymentRecord>,
    /// Root of the persisted records, `None` for ephemeral networks.
    persist_dir: Option<PathBuf>,
}

impl<C: Chain> Deployments<C> {
    pub fn new(chain: C, network: impl Into<String>, artifacts: ArtifactStore) -> Self {
        Self {
            chain,
            network: network.into(),
            artifacts,
            records: BTreeMap::new(),
            persist_dir: None,
        }
    }

    /// Persist records under `dir/<network>/`.
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn network_dir(&self) -> Option<PathBuf> {
        self.persist_dir.as_ref().map(|dir| dir.join(&self.network))
    }

    fn record_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.json", name))
    }

    /// The account deployments are sent from by default.
    pub async fn deployer(&self) -> Result<Address> {
        self.chain
            .accounts()
            .await?
            .first()
            .copied()
            .context("Chain exposes no accounts to deploy from")
    }

    /// Deploy the artifact `name` and record it.
    pub async fn deploy(&mut self, name: &str, options: DeployOptions) -> Result<DeploymentRecord> {
        let artifact = self.artifacts.load(name)?;
        let deployer = match options.from {
            Some(from) => from,
            None => self.deployer().await?,
        };

        let tx = TxRequest::create(&artifact.bytecode, &options.args).sender(deployer);
        let tx_hash = self
            .chain
            .send_transaction(tx)
            .await
            .map_err(|e| deployment_failed(name, e))?;

        tracing::info!(
            contract = name,
            tx_hash = %tx_hash,
            confirmations = options.wait_confirmations,
            "Deploying contract..."
        );

        let receipt = self
            .chain
            .wait_for_receipt(tx_hash, options.wait_confirmations)
            .await
            .map_err(|e| deployment_failed(name, e))?;

        if !receipt.status {
            return Err(DeployError::DeploymentFailed {
                contract: name.to_string(),
                reason: format!("transaction {} reverted", tx_hash),
            }
            .into());
        }

        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::DeploymentFailed {
                contract: name.to_string(),
                reason: "receipt has no contract address".to_string(),
            })?;

        let record = DeploymentRecord {
            contract_name: name.to_string(),
            address,
            args: options.args,
            transaction_hash: tx_hash,
            block_number: receipt.block_number,
            confirmations: options.wait_confirmations,
            deployer,
            abi: artifact.abi,
        };

        tracing::info!(
            contract = name,
            address = %address,
            block = receipt.block_number,
            "Contract deployed"
        );

        self.save(&record)?;
        self.records.insert(name.to_string(), record.clone());

        Ok(record)
    }

    fn save(&self, record: &DeploymentRecord) -> Result<()> {
        let Some(dir) = self.network_dir() else {
            return Ok(());
        };

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = Self::record_path(&dir, &record.contract_name);
        let content = serde_json::to_string_pretty(record)
            .context("Failed to serialize deployment record")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Deployment record saved");
        Ok(())
    }

    /// Look a deployment up by name, falling back to persisted records.
    pub fn get(&self, name: &str) -> Result<DeploymentRecord> {
        if let Some(record) = self.records.get(name) {
            return Ok(record.clone());
        }

        let path = self
            .network_dir()
            .map(|dir| Self::record_path(&dir, name))
            .filter(|path| path.exists())
            .ok_or_else(|| DeployError::UnknownDeployment {
                name: name.to_string(),
            })?;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse deployment record {}", path.display()))
    }

    /// Like [`Self::get`] but `None` when nothing was deployed under `name`.
    pub fn try_get(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        match self.get(name) {
            Ok(record) => Ok(Some(record)),
            Err(e) if matches!(
                e.downcast_ref::<DeployError>(),
                Some(DeployError::UnknownDeployment { .. })
            ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn deployment_failed(name: &str, err: anyhow::Error) -> anyhow::Error {
    DeployError::DeploymentFailed {
        contract: name.to_string(),
        reason: format!("{:#}", err),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contracts::{CoordinatorConstructorArgs, VRF_COORDINATOR_MOCK},
        sim::SimulatedChain,
    };
    use alloy_core::primitives::U256;
    use tempdir::TempDir;

    fn mock_args() -> Bytes {
        CoordinatorConstructorArgs {
            base_fee: U256::from(1),
            gas_price_link: U256::from(1),
        }
        .abi_encode()
    }

    #[tokio::test]
    async fn test_deploy_then_get() {
        let chain = SimulatedChain::new();
        let mut deployments = Deployments::new(chain.clone(), "hardhat", chain.artifacts());

        let record = deployments
            .deploy(
                VRF_COORDINATOR_MOCK,
                DeployOptions {
                    args: mock_args(),
                    wait_confirmations: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(deployments.get(VRF_COORDINATOR_MOCK).unwrap(), record);
        assert_eq!(record.deployer, deployments.deployer().await.unwrap());
        assert_eq!(record.confirmations, 1);
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let chain = SimulatedChain::new();
        let deployments = Deployments::new(chain.clone(), "hardhat", chain.artifacts());

        let err = deployments.get("Raffle").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::UnknownDeployment { .. })
        ));
        assert!(deployments.try_get("Raffle").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_artifact_fails() {
        let chain = SimulatedChain::new();
        let mut deployments = Deployments::new(chain.clone(), "hardhat", chain.artifacts());

        assert!(deployments
            .deploy("Lottery", DeployOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_records_are_persisted() {
        let tmp = TempDir::new("deployments").unwrap();
        let chain = SimulatedChain::new();
        let mut deployments = Deployments::new(chain.clone(), "localhost", chain.artifacts())
            .with_persist_dir(tmp.path());

        let record = deployments
            .deploy(
                VRF_COORDINATOR_MOCK,
                DeployOptions {
                    args: mock_args(),
                    wait_confirmations: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(tmp
            .path()
            .join("localhost")
            .join(format!("{}.json", VRF_COORDINATOR_MOCK))
            .exists());

        // A fresh service finds the record on disk.
        let reopened = Deployments::new(chain.clone(), "localhost", chain.artifacts())
            .with_persist_dir(tmp.path());
        assert_eq!(reopened.get(VRF_COORDINATOR_MOCK).unwrap(), record);
    }
}

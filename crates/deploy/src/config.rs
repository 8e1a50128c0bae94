//! Workspace configuration.
//!
//! Values are layered with figment: built-in defaults, then `Raffle.toml`,
//! then `RAFFLE_*` environment variables (nested keys use `__`, e.g.
//! `RAFFLE_FRONTEND__ABI`). The bare `UPDATE_FRONTEND` variable also enables
//! the frontend export when set to anything non-empty.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    ArtifactStore, DeployError,
    chain::{LocalWallet, RpcChain},
    deployments::Deployments,
    exporter::FrontendPaths,
    harness::DEFAULT_LIVE_TIMEOUT,
    network::{NetworkConfig, NetworkProfile, is_development_network},
    orchestrator::DeploySettings,
    provisioner::SubscriptionIdLocation,
    sim::{self, SimulatedChain},
    verify::{ETHERSCAN_SEPOLIA_API, EtherscanVerifier},
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "Raffle.toml";

/// Prefix of the environment overrides.
pub const ENV_PREFIX: &str = "RAFFLE_";

/// The network served by the in-process chain.
pub const IN_PROCESS_NETWORK: &str = "hardhat";

/// Configuration of a `raffle` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaffleConfig {
    /// Active network name.
    pub network: String,
    /// Overrides the profile's RPC endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    /// Key signing transactions on networks without unlocked accounts.
    /// Never written back to disk.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    /// Hardhat `artifacts/` or Foundry `out/` directory.
    pub artifacts_dir: PathBuf,
    /// Root of the persisted deployment records.
    pub deployments_dir: PathBuf,
    pub update_frontend: bool,
    pub frontend: FrontendPaths,
    #[serde(skip_serializing)]
    pub etherscan_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etherscan_api_url: Option<Url>,
    /// Overrides the profile's confirmation count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_confirmations: Option<u64>,
    pub subscription_id_location: SubscriptionIdLocation,
    /// Seconds the live round waits for the oracle.
    pub live_timeout_secs: u64,
    /// Extra or overriding network profiles, keyed by name.
    pub networks: BTreeMap<String, NetworkProfile>,
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self {
            network: IN_PROCESS_NETWORK.to_string(),
            rpc_url: None,
            private_key: None,
            artifacts_dir: PathBuf::from("artifacts"),
            deployments_dir: PathBuf::from("deployments"),
            update_frontend: false,
            frontend: FrontendPaths::default(),
            etherscan_api_key: None,
            etherscan_api_url: None,
            block_confirmations: None,
            subscription_id_location: SubscriptionIdLocation::default(),
            live_timeout_secs: DEFAULT_LIVE_TIMEOUT.as_secs(),
            networks: BTreeMap::new(),
        }
    }
}

/// Chain backend selected by the configuration.
#[derive(Debug, Clone)]
pub enum Connection {
    Simulated(SimulatedChain),
    Rpc(RpcChain),
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty())
}

impl RaffleConfig {
    /// Load defaults, then `path` (when it exists), then the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            tracing::debug!(path = %path.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(path));
        }

        let mut config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Invalid configuration (file {})", path.display()))?;

        config.update_frontend |= env_flag("UPDATE_FRONTEND");
        Ok(config)
    }

    /// Save the configuration as TOML. Secrets are left out.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Read a TOML file without layering defaults or the environment.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file as TOML")
    }

    /// Built-in profiles with the configured ones layered on top.
    pub fn network_config(&self) -> NetworkConfig {
        let mut networks = NetworkConfig::default();
        networks.merge(self.networks.iter().map(|(name, profile)| NetworkProfile {
            name: name.clone(),
            ..profile.clone()
        }));
        networks
    }

    /// Profile of the active network.
    pub fn profile(&self) -> Result<NetworkProfile> {
        let networks = self.network_config();
        let mut profile = networks.by_name(&self.network)?.clone();
        if let Some(rpc_url) = &self.rpc_url {
            profile.rpc_url = Some(rpc_url.clone());
        }
        if let Some(confirmations) = self.block_confirmations {
            profile.block_confirmations = confirmations;
        }
        Ok(profile)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_secs(self.live_timeout_secs)
    }

    /// Connect to the active network.
    pub fn connect(&self) -> Result<Connection> {
        let profile = self.profile()?;

        let Some(url) = profile.rpc_url.clone() else {
            if profile.name == IN_PROCESS_NETWORK {
                tracing::debug!("Using the in-process development chain");
                return Ok(Connection::Simulated(SimulatedChain::new()));
            }
            return Err(DeployError::ConfigurationMissing {
                network: format!("{} (rpc_url)", profile.name),
            }
            .into());
        };

        let mut chain = RpcChain::new(url)?;
        match &self.private_key {
            Some(key) => {
                let wallet: LocalWallet = key.parse()?;
                tracing::info!(address = %wallet.address(), network = %profile.name, "Signing with local key");
                chain = chain.with_wallet(wallet);
            }
            None if !profile.is_development() => {
                tracing::warn!(
                    network = %profile.name,
                    "No private key configured, relying on the node's unlocked accounts"
                );
            }
            None => {}
        }
        Ok(Connection::Rpc(chain))
    }

    /// Artifacts for `connection`: the bundled ones in-process, the build
    /// output otherwise.
    pub fn artifacts(&self, connection: &Connection) -> ArtifactStore {
        match connection {
            Connection::Simulated(_) => sim::artifacts(),
            Connection::Rpc(_) => ArtifactStore::new(&self.artifacts_dir),
        }
    }

    /// Deployment records of the active network over `chain`.
    ///
    /// Development chains lose their state on restart, so their records are
    /// kept in memory only and a stale mock address is never adopted.
    pub fn deployments<C>(&self, chain: C, artifacts: ArtifactStore) -> Deployments<C>
    where
        C: crate::chain::Chain,
    {
        let deployments = Deployments::new(chain, self.network.clone(), artifacts);
        if is_development_network(&self.network) {
            deployments
        } else {
            deployments.with_persist_dir(self.deployments_dir.clone())
        }
    }

    pub fn deploy_settings(&self) -> Result<DeploySettings> {
        let verifier = match &self.etherscan_api_key {
            Some(key) => {
                let api_url = match &self.etherscan_api_url {
                    Some(url) => url.clone(),
                    None => Url::parse(ETHERSCAN_SEPOLIA_API)?,
                };
                Some(EtherscanVerifier::new(api_url, key.clone())?)
            }
            None => None,
        };

        Ok(DeploySettings {
            id_location: self.subscription_id_location,
            block_confirmations: self.block_confirmations,
            update_frontend: self.update_frontend,
            frontend: self.frontend.clone(),
            verifier,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeployTag, Orchestrator, contracts::VRF_COORDINATOR_MOCK};
    use tempdir::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let tmp = TempDir::new("config").unwrap();
        let config = RaffleConfig::load(&tmp.path().join(CONFIG_FILENAME)).unwrap();

        assert_eq!(config.network, "hardhat");
        assert_eq!(config.live_timeout(), Duration::from_secs(120));
        assert_eq!(config.subscription_id_location, SubscriptionIdLocation::Topic(1));
    }

    #[test]
    fn test_file_overrides() {
        let tmp = TempDir::new("config").unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
network = "sepolia"
live_timeout_secs = 300

[subscription_id_location]
kind = "data"
index = 0

[networks.holesky]
chain_id = 17000
entrance_fee = "0x2386f26fc10000"
callback_gas_limit = 500000
interval = 30
gas_lane = "0x787d74caea10b2b357790d5b5247c2f63d1d91572a9846f780606e4d953677ae"
vrf_coordinator = "0x9DdfaCa8183c41ad55329BdeeD9F6A8d53168B1B"
subscription_id = "0x1"
"#,
        )
        .unwrap();

        let config = RaffleConfig::load(&path).unwrap();

        assert_eq!(config.network, "sepolia");
        assert_eq!(config.live_timeout_secs, 300);
        assert_eq!(config.subscription_id_location, SubscriptionIdLocation::Data(0));

        let networks = config.network_config();
        let holesky = networks.by_name("holesky").unwrap();
        assert_eq!(holesky.chain_id, 17000);
        assert_eq!(holesky.interval, 30);
        assert_eq!(holesky.block_confirmations, 1);
        assert!(networks.by_name("sepolia").is_ok());
    }

    #[test]
    fn test_profile_applies_overrides() {
        let config = RaffleConfig {
            network: "sepolia".to_string(),
            rpc_url: Some(Url::parse("http://10.0.0.1:8545").unwrap()),
            block_confirmations: Some(2),
            ..Default::default()
        };

        let profile = config.profile().unwrap();

        assert_eq!(profile.block_confirmations, 2);
        assert_eq!(profile.rpc_url.unwrap().as_str(), "http://10.0.0.1:8545/");
    }

    #[test]
    fn test_unknown_network() {
        let config = RaffleConfig {
            network: "mainnet".to_string(),
            ..Default::default()
        };

        let err = config.profile().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ConfigurationMissing { .. })
        ));
    }

    #[test]
    fn test_connect_selects_backend() {
        let config = RaffleConfig::default();
        assert!(matches!(config.connect().unwrap(), Connection::Simulated(_)));

        let config = RaffleConfig {
            network: "localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.connect().unwrap(), Connection::Rpc(_)));

        // Sepolia has no endpoint unless configured.
        let config = RaffleConfig {
            network: "sepolia".to_string(),
            ..Default::default()
        };
        assert!(config.connect().is_err());
    }

    #[tokio::test]
    async fn test_development_records_are_not_persisted() {
        let tmp = TempDir::new("config").unwrap();
        let config = RaffleConfig {
            network: "localhost".to_string(),
            deployments_dir: tmp.path().join("deployments"),
            ..Default::default()
        };
        let chain = SimulatedChain::new();
        let deployments = config.deployments(chain.clone(), chain.artifacts());
        let mut orchestrator =
            Orchestrator::new(config.network_config(), deployments, config.deploy_settings().unwrap());

        orchestrator.run(&[DeployTag::Mocks]).await.unwrap();

        assert!(orchestrator.deployments().get(VRF_COORDINATOR_MOCK).is_ok());
        assert!(!tmp.path().join("deployments").exists());

        // A later run starts from scratch instead of adopting the old mock.
        let fresh = config.deployments(SimulatedChain::new(), chain.artifacts());
        assert!(fresh.try_get(VRF_COORDINATOR_MOCK).unwrap().is_none());
    }

    #[test]
    fn test_save_leaves_secrets_out() {
        let tmp = TempDir::new("config").unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        let config = RaffleConfig {
            private_key: Some("0xdead".to_string()),
            etherscan_api_key: Some("KEY".to_string()),
            update_frontend: true,
            ..Default::default()
        };

        config.save_to_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let reloaded = RaffleConfig::load_from_file(&path).unwrap();

        assert!(!content.contains("0xdead"));
        assert!(!content.contains("KEY"));
        assert!(reloaded.update_frontend);
        assert!(reloaded.private_key.is_none());
    }
}

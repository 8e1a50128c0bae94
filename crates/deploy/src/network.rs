//! Per-network deployment parameters.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, B256, U256, address, b256};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::DeployError;

/// Networks that are ephemeral and get a mock VRF coordinator.
pub const DEVELOPMENT_CHAINS: [&str; 2] = ["hardhat", "localhost"];

/// Chain id shared by the local development networks.
pub const DEVELOPMENT_CHAIN_ID: u64 = 31337;

/// Sepolia chain id.
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

const SEPOLIA_VRF_COORDINATOR: Address = address!("0x9DdfaCa8183c41ad55329BdeeD9F6A8d53168B1B");
const DEFAULT_GAS_LANE: B256 =
    b256!("0x787d74caea10b2b357790d5b5247c2f63d1d91572a9846f780606e4d953677ae");
const SEPOLIA_SUBSCRIPTION_ID: &str =
    "27717986899295127811168858702949635493186843711053243279688145205671846029891";

/// 0.01 ether.
const DEFAULT_ENTRANCE_FEE_WEI: u64 = 10_000_000_000_000_000;
const DEFAULT_CALLBACK_GAS_LIMIT: u32 = 500_000;
const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Returns true when `name` is one of the local development networks.
pub fn is_development_network(name: &str) -> bool {
    DEVELOPMENT_CHAINS.contains(&name)
}

/// Deployment parameters of a single network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Network name (`hardhat`, `localhost`, `sepolia`, ...). Filled from the
    /// table key when read from the configuration file.
    #[serde(default)]
    pub name: String,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Entrance fee in wei.
    pub entrance_fee: U256,
    /// Gas limit granted to the VRF callback.
    pub callback_gas_limit: u32,
    /// Seconds between two draws.
    pub interval: u64,
    /// VRF key hash selecting the gas lane.
    pub gas_lane: B256,
    /// Address of the live VRF coordinator. Absent on development networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf_coordinator: Option<Address>,
    /// Pre-registered VRF subscription. Absent on development networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<U256>,
    /// JSON-RPC endpoint. Absent for the in-process `hardhat` network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    /// Confirmations to wait for before a deployment is considered durable.
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
}

fn default_block_confirmations() -> u64 {
    1
}

impl NetworkProfile {
    /// Whether this profile describes a local development network.
    pub fn is_development(&self) -> bool {
        is_development_network(&self.name)
    }

    fn development(name: &str, rpc_url: Option<Url>) -> Self {
        Self {
            name: name.to_string(),
            chain_id: DEVELOPMENT_CHAIN_ID,
            entrance_fee: U256::from(DEFAULT_ENTRANCE_FEE_WEI),
            callback_gas_limit: DEFAULT_CALLBACK_GAS_LIMIT,
            interval: DEFAULT_INTERVAL_SECS,
            gas_lane: DEFAULT_GAS_LANE,
            vrf_coordinator: None,
            subscription_id: None,
            rpc_url,
            block_confirmations: 1,
        }
    }

    fn sepolia() -> Self {
        Self {
            name: "sepolia".to_string(),
            chain_id: SEPOLIA_CHAIN_ID,
            entrance_fee: U256::from(DEFAULT_ENTRANCE_FEE_WEI),
            callback_gas_limit: DEFAULT_CALLBACK_GAS_LIMIT,
            interval: DEFAULT_INTERVAL_SECS,
            gas_lane: DEFAULT_GAS_LANE,
            vrf_coordinator: Some(SEPOLIA_VRF_COORDINATOR),
            subscription_id: SEPOLIA_SUBSCRIPTION_ID.parse().ok(),
            rpc_url: None,
            block_confirmations: 6,
        }
    }
}

/// Static store of network profiles, keyed by network name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkConfig {
    networks: BTreeMap<String, NetworkProfile>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let localhost_rpc = Url::parse("http://127.0.0.1:8545").ok();
        Self::from_profiles([
            NetworkProfile::development("hardhat", None),
            NetworkProfile::development("localhost", localhost_rpc),
            NetworkProfile::sepolia(),
        ])
    }
}

impl NetworkConfig {
    pub fn from_profiles(profiles: impl IntoIterator<Item = NetworkProfile>) -> Self {
        Self {
            networks: profiles
                .into_iter()
                .map(|profile| (profile.name.clone(), profile))
                .collect(),
        }
    }

    /// Add or replace profiles. Later entries win.
    pub fn merge(&mut self, profiles: impl IntoIterator<Item = NetworkProfile>) {
        for profile in profiles {
            self.networks.insert(profile.name.clone(), profile);
        }
    }

    /// Look a profile up by chain id.
    ///
    /// Several development networks share a chain id; the first one by name
    /// order is returned, which is fine since they carry the same parameters.
    pub fn lookup(&self, chain_id: u64) -> Result<&NetworkProfile, DeployError> {
        self.networks
            .values()
            .find(|profile| profile.chain_id == chain_id)
            .ok_or_else(|| DeployError::ConfigurationMissing {
                network: format!("chain id {chain_id}"),
            })
    }

    /// Look a profile up by network name.
    pub fn by_name(&self, name: &str) -> Result<&NetworkProfile, DeployError> {
        self.networks
            .get(name)
            .ok_or_else(|| DeployError::ConfigurationMissing {
                network: name.to_string(),
            })
    }

    pub fn profiles(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.networks.values()
    }
}

//! Compiled contract artifacts.
//!
//! Both Hardhat (`artifacts/contracts/X.sol/X.json`, `bytecode` as a string)
//! and Foundry (`out/X.sol/X.json`, `bytecode.object`) layouts are understood.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::{Context, Result};
use serde_json::Value;

/// ABI and creation bytecode of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub contract_name: String,
    /// Fully qualified source name (`contracts/Raffle.sol:Raffle`), when known.
    pub source_name: Option<String>,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Parse an artifact from its JSON content.
    pub fn from_json(contract_name: &str, content: &str) -> Result<Self> {
        let json: Value = serde_json::from_str(content)
            .with_context(|| format!("Failed to parse artifact of {}", contract_name))?;

        let abi: JsonAbi = serde_json::from_value(json["abi"].clone())
            .with_context(|| format!("Artifact of {} has no valid abi", contract_name))?;

        let bytecode_hex = json["bytecode"]
            .as_str()
            .or_else(|| json["bytecode"]["object"].as_str())
            .with_context(|| format!("Artifact of {} has no bytecode", contract_name))?;
        let bytecode: Bytes = bytecode_hex
            .parse()
            .with_context(|| format!("Artifact of {} has invalid bytecode hex", contract_name))?;

        if bytecode.is_empty() {
            anyhow::bail!(
                "Artifact of {} has empty bytecode (abstract contract or interface?)",
                contract_name
            );
        }

        let source_name = json["sourceName"]
            .as_str()
            .map(|source| format!("{}:{}", source, contract_name));

        Ok(Self {
            contract_name: contract_name.to_string(),
            source_name,
            abi,
            bytecode,
        })
    }
}

/// Locates artifacts under a build output directory, or serves preloaded ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactStore {
    root: Option<PathBuf>,
    preloaded: BTreeMap<String, ContractArtifact>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            preloaded: BTreeMap::new(),
        }
    }

    /// A store serving only the given artifacts.
    pub fn in_memory(artifacts: impl IntoIterator<Item = ContractArtifact>) -> Self {
        Self {
            root: None,
            preloaded: artifacts
                .into_iter()
                .map(|artifact| (artifact.contract_name.clone(), artifact))
                .collect(),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn candidates(root: &Path, contract_name: &str) -> Vec<PathBuf> {
        let file = format!("{}.json", contract_name);
        let dir = format!("{}.sol", contract_name);
        vec![
            // Hardhat layout.
            root.join("contracts").join(&dir).join(&file),
            // Hardhat mocks usually live under `contracts/test`.
            root.join("contracts").join("test").join(&dir).join(&file),
            // Foundry layout.
            root.join(&dir).join(&file),
        ]
    }

    /// Load the artifact of `contract_name`.
    pub fn load(&self, contract_name: &str) -> Result<ContractArtifact> {
        if let Some(artifact) = self.preloaded.get(contract_name) {
            return Ok(artifact.clone());
        }

        let root = self
            .root
            .as_deref()
            .with_context(|| format!("No artifact registered for {}", contract_name))?;

        let path = Self::candidates(root, contract_name)
            .into_iter()
            .find(|path| path.exists())
            .with_context(|| {
                format!(
                    "Cannot find artifact for {} in {}. Compile the contracts first.",
                    contract_name,
                    root.display()
                )
            })?;

        tracing::debug!(contract = contract_name, path = %path.display(), "Loading artifact");

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        ContractArtifact::from_json(contract_name, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const ABI: &str = r#"[{"type":"function","name":"getInterval","inputs":[],"outputs":[{"name":"","type":"uint256","internalType":"uint256"}],"stateMutability":"view"}]"#;

    #[test]
    fn test_hardhat_artifact() {
        let content = format!(
            r#"{{"contractName":"Raffle","sourceName":"contracts/Raffle.sol","abi":{},"bytecode":"0x6080"}}"#,
            ABI
        );

        let artifact = ContractArtifact::from_json("Raffle", &content).unwrap();

        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80]);
        assert_eq!(artifact.abi.functions().count(), 1);
        assert_eq!(
            artifact.source_name.as_deref(),
            Some("contracts/Raffle.sol:Raffle")
        );
    }

    #[test]
    fn test_foundry_artifact() {
        let content = format!(r#"{{"abi":{},"bytecode":{{"object":"0x6080"}}}}"#, ABI);

        let artifact = ContractArtifact::from_json("Raffle", &content).unwrap();

        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80]);
        assert!(artifact.source_name.is_none());
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        let content = format!(r#"{{"abi":{},"bytecode":"0x"}}"#, ABI);
        assert!(ContractArtifact::from_json("IRaffle", &content).is_err());
    }

    #[test]
    fn test_store_finds_hardhat_layout() {
        let tmp = TempDir::new("artifacts").unwrap();
        let dir = tmp.path().join("contracts/Raffle.sol");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("Raffle.json"),
            format!(r#"{{"abi":{},"bytecode":"0x6080"}}"#, ABI),
        )
        .unwrap();

        let store = ArtifactStore::new(tmp.path());

        assert!(store.load("Raffle").is_ok());
        assert!(store.load("VRFCoordinatorV2Mock").is_err());
    }

    #[test]
    fn test_in_memory_store() {
        let content = format!(r#"{{"abi":{},"bytecode":"0x6080"}}"#, ABI);
        let artifact = ContractArtifact::from_json("Raffle", &content).unwrap();

        let store = ArtifactStore::in_memory([artifact.clone()]);

        assert_eq!(store.load("Raffle").unwrap(), artifact);
        assert!(store.load("Other").is_err());
    }
}

//! Frontend constants export.
//!
//! Writes the raffle ABI and a `chainId -> [address]` map into the frontend
//! project so it can talk to the latest deployment.

use std::{
    collections::BTreeMap,
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Address};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::DeployError;

/// Files of the frontend project that receive the deployment data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendPaths {
    /// ABI JSON array.
    pub abi: PathBuf,
    /// `contractAddress.json`.
    pub addresses: PathBuf,
}

impl Default for FrontendPaths {
    fn default() -> Self {
        let constants = Path::new("frontend").join("src").join("constants");
        Self {
            abi: constants.join("abi.json"),
            addresses: constants.join("contractAddress.json"),
        }
    }
}

/// Deployed addresses per chain id, as read by the frontend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrontendAddressMap(BTreeMap<String, Vec<String>>);

impl FrontendAddressMap {
    /// Parse the persisted map. Empty or malformed content yields an empty map.
    pub fn parse_lenient(content: &str, path: &Path) -> Self {
        if content.trim().is_empty() {
            return Self::default();
        }

        match serde_json::from_str(content) {
            Ok(map) => map,
            Err(e) => {
                let err = DeployError::MalformedPersistedState {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(%err, "Starting from an empty address map");
                Self::default()
            }
        }
    }

    /// Record `address` for `chain_id`. Returns false when it was already
    /// present, in any letter case.
    pub fn insert(&mut self, chain_id: u64, address: Address) -> bool {
        let address = address.to_checksum(None);
        let addresses = self.0.entry(chain_id.to_string()).or_default();

        if addresses
            .iter()
            .any(|known| known.eq_ignore_ascii_case(&address))
        {
            return false;
        }

        addresses.push(address);
        true
    }

    pub fn addresses(&self, chain_id: u64) -> &[String] {
        self.0
            .get(&chain_id.to_string())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Writes deployment data into the frontend project.
#[derive(Debug, Clone)]
pub struct FrontendExporter {
    paths: FrontendPaths,
}

impl FrontendExporter {
    pub fn new(paths: FrontendPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &FrontendPaths {
        &self.paths
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    /// Overwrite the ABI file with the pretty-printed ABI items.
    pub fn export_abi(&self, abi: &JsonAbi) -> Result<()> {
        let path = &self.paths.abi;
        Self::ensure_parent(path)?;

        let content = serde_json::to_string_pretty(abi).context("Failed to serialize ABI")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(path = %path.display(), "Frontend ABI updated");
        Ok(())
    }

    /// Add `address` under `chain_id` in the address file.
    ///
    /// The file is locked for the whole read-modify-write so concurrent
    /// exports cannot drop each other's entries.
    pub fn export_address(&self, chain_id: u64, address: Address) -> Result<FrontendAddressMap> {
        let path = &self.paths.addresses;
        Self::ensure_parent(path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;

        let mut content = String::new();
        if let Err(e) = file.read_to_string(&mut content) {
            tracing::warn!(path = %path.display(), err = %e, "Unreadable address file, starting over");
            content.clear();
        }

        let mut map = FrontendAddressMap::parse_lenient(&content, path);
        if map.insert(chain_id, address) {
            tracing::info!(chain_id, %address, "Frontend address added");
        } else {
            tracing::debug!(chain_id, %address, "Frontend address already present");
        }

        let content = serde_json::to_string_pretty(&map).context("Failed to serialize address map")?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.flush()?;

        FileExt::unlock(&file)?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn exporter(tmp: &TempDir) -> FrontendExporter {
        FrontendExporter::new(FrontendPaths {
            abi: tmp.path().join("constants/abi.json"),
            addresses: tmp.path().join("constants/contractAddress.json"),
        })
    }

    const RAFFLE: Address = Address::repeat_byte(0xab);

    #[test]
    fn test_export_address_is_idempotent() {
        let tmp = TempDir::new("frontend").unwrap();
        let exporter = exporter(&tmp);

        exporter.export_address(31337, RAFFLE).unwrap();
        let map = exporter.export_address(31337, RAFFLE).unwrap();

        assert_eq!(map.addresses(31337).len(), 1);

        let on_disk: BTreeMap<String, Vec<String>> = serde_json::from_str(
            &std::fs::read_to_string(&exporter.paths().addresses).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["31337"], vec![RAFFLE.to_checksum(None)]);
    }

    #[test]
    fn test_lowercase_address_is_a_duplicate() {
        let tmp = TempDir::new("frontend").unwrap();
        let exporter = exporter(&tmp);
        std::fs::create_dir_all(tmp.path().join("constants")).unwrap();
        std::fs::write(
            &exporter.paths().addresses,
            format!(r#"{{"31337": ["{}"]}}"#, RAFFLE.to_string().to_lowercase()),
        )
        .unwrap();

        let map = exporter.export_address(31337, RAFFLE).unwrap();

        assert_eq!(map.addresses(31337).len(), 1);
    }

    #[test]
    fn test_addresses_accumulate_per_chain() {
        let tmp = TempDir::new("frontend").unwrap();
        let exporter = exporter(&tmp);

        exporter.export_address(31337, RAFFLE).unwrap();
        exporter.export_address(31337, Address::repeat_byte(0xcd)).unwrap();
        let map = exporter.export_address(11155111, RAFFLE).unwrap();

        assert_eq!(map.addresses(31337).len(), 2);
        assert_eq!(map.addresses(11155111).len(), 1);
        assert!(map.addresses(1).is_empty());
    }

    #[test]
    fn test_malformed_file_is_replaced() {
        let tmp = TempDir::new("frontend").unwrap();
        let exporter = exporter(&tmp);
        std::fs::create_dir_all(tmp.path().join("constants")).unwrap();
        std::fs::write(&exporter.paths().addresses, "{ not json").unwrap();

        let map = exporter.export_address(31337, RAFFLE).unwrap();

        assert_eq!(map.addresses(31337).len(), 1);
        let content = std::fs::read_to_string(&exporter.paths().addresses).unwrap();
        assert!(serde_json::from_str::<FrontendAddressMap>(&content).is_ok());
    }

    #[test]
    fn test_export_abi_writes_array() {
        let tmp = TempDir::new("frontend").unwrap();
        let exporter = exporter(&tmp);

        exporter
            .export_abi(&crate::contracts::Raffle::abi::contract())
            .unwrap();

        let content = std::fs::read_to_string(&exporter.paths().abi).unwrap();
        let items: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert!(items.iter().any(|item| item["name"] == "enterRaffle"));
    }
}

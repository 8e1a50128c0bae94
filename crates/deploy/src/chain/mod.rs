//! Chain backends the deployment scripts run against.
//!
//! [`Chain`] is the narrow surface the rest of the crate needs from a node:
//! transactions, calls, receipts, logs and the development-only clock
//! controls. [`RpcChain`] speaks JSON-RPC to a real node and
//! [`crate::sim::SimulatedChain`] runs the in-process `hardhat` network.

mod rpc;
mod signer;

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};

pub use rpc::RpcChain;
pub use signer::LocalWallet;

use crate::DeployError;

/// A transaction or call request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRequest {
    /// Sender. Backends fall back to their default account when unset.
    pub from: Option<Address>,
    /// Recipient. `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub gas: Option<u64>,
}

impl TxRequest {
    /// A contract creation carrying `bytecode ++ constructor_args`.
    pub fn create(bytecode: &Bytes, constructor_args: &Bytes) -> Self {
        let mut data = bytecode.to_vec();
        data.extend_from_slice(constructor_args);
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// A call to `to` with the given calldata.
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// An event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub block_number: u64,
    pub transaction_hash: B256,
}

/// A mined transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub block_number: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    #[serde(deserialize_with = "deserialize_status")]
    pub status: bool,
    pub logs: Vec<Log>,
    /// Zero on backends that do not charge for gas.
    #[serde(default)]
    pub gas_used: U256,
    #[serde(default)]
    pub effective_gas_price: U256,
}

impl TxReceipt {
    /// Wei the sender paid for this transaction.
    pub fn fee(&self) -> U256 {
        self.gas_used * self.effective_gas_price
    }

    /// Logs of this receipt emitted by `address` with the given first topic.
    pub fn logs_matching(&self, address: Address, topic0: B256) -> impl Iterator<Item = &Log> {
        self.logs.iter().filter(move |log| {
            log.address == address && log.topics.first() == Some(&topic0)
        })
    }
}

/// Selects logs by emitter and first topic from a starting block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
}

impl LogFilter {
    pub fn matches(&self, log: &Log) -> bool {
        log.address == self.address
            && log.topics.first() == Some(&self.topic0)
            && log.block_number >= self.from_block
    }
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn deserialize_status<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_u64_from_hex(deserializer).map(|status| status == 1)
}

/// Minimal node interface used by the deployment workflow.
pub trait Chain: Send + Sync {
    /// Chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Accounts available for sending transactions. The first one deploys.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    /// Submit a transaction and return its hash.
    ///
    /// Transactions rejected because they would revert fail with
    /// [`DeployError::Reverted`].
    fn send_transaction(&self, tx: TxRequest) -> impl Future<Output = Result<B256>> + Send;

    /// Wait until the transaction is mined and buried under `confirmations`
    /// blocks (the inclusion block counts as the first).
    fn wait_for_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    /// Execute a read-only call against the latest block.
    fn call(&self, tx: TxRequest) -> impl Future<Output = Result<Bytes>> + Send;

    fn balance(&self, address: Address) -> impl Future<Output = Result<U256>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Timestamp of the latest block, in seconds.
    fn block_timestamp(&self) -> impl Future<Output = Result<u64>> + Send;

    fn logs(&self, filter: LogFilter) -> impl Future<Output = Result<Vec<Log>>> + Send;

    /// Shift the clock of the next block forward (development networks only).
    fn increase_time(&self, seconds: u64) -> impl Future<Output = Result<()>> + Send;

    /// Mine an empty block (development networks only).
    fn mine(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Send a transaction, wait for `confirmations`, and fail on a reverted receipt.
pub async fn send_and_confirm<C: Chain>(
    chain: &C,
    tx: TxRequest,
    confirmations: u64,
) -> Result<TxReceipt> {
    let to = tx.to.unwrap_or_default();
    let tx_hash = chain.send_transaction(tx).await?;

    tracing::debug!(tx_hash = %tx_hash, confirmations, "Transaction sent, waiting for receipt");

    let receipt = chain.wait_for_receipt(tx_hash, confirmations).await?;
    if !receipt.status {
        return Err(DeployError::Reverted {
            to,
            data: Bytes::new(),
        }
        .into());
    }

    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_from_rpc_json() {
        let json = serde_json::json!({
            "transactionHash": "0x6f3c5a0e8a9b2d0b6c6a3f0e3a1d5c7b9e0f1a2b3c4d5e6f708192a3b4c5d6e7",
            "blockNumber": "0x1b",
            "from": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            "to": null,
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "status": "0x1",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "logs": [{
                "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                "data": "0x",
                "blockNumber": "0x1b",
                "transactionHash": "0x6f3c5a0e8a9b2d0b6c6a3f0e3a1d5c7b9e0f1a2b3c4d5e6f708192a3b4c5d6e7",
                "logIndex": "0x0"
            }]
        });

        let receipt: TxReceipt = serde_json::from_value(json).unwrap();

        assert_eq!(receipt.block_number, 27);
        assert!(receipt.status);
        assert!(receipt.to.is_none());
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.fee(), U256::from(21_000u64 * 1_000_000_000));
        assert_eq!(
            receipt.contract_address.unwrap().to_string().to_lowercase(),
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        );
    }

    #[test]
    fn test_create_request_appends_args() {
        let tx = TxRequest::create(&Bytes::from(vec![0x60, 0x80]), &Bytes::from(vec![0x01]));

        assert!(tx.to.is_none());
        assert_eq!(tx.data.as_ref(), &[0x60, 0x80, 0x01]);
    }

    #[test]
    fn test_log_filter_matches() {
        let log = Log {
            address: Address::repeat_byte(1),
            topics: vec![B256::repeat_byte(2)],
            data: Bytes::new(),
            block_number: 10,
            transaction_hash: B256::ZERO,
        };
        let filter = LogFilter {
            address: Address::repeat_byte(1),
            topic0: B256::repeat_byte(2),
            from_block: 10,
        };

        assert!(filter.matches(&log));
        assert!(!LogFilter { from_block: 11, ..filter }.matches(&log));
        assert!(!LogFilter { topic0: B256::ZERO, ..filter }.matches(&log));
    }
}

//! JSON-RPC chain backend.

use std::time::Duration;

use alloy_consensus::TxLegacy;
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use url::Url;

use super::{Chain, LocalWallet, Log, LogFilter, TxReceipt, TxRequest};
use crate::{
    DeployError,
    rpc::{self, RpcError},
};

/// Default time to wait for a receipt to reach the requested depth.
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(600);

/// Headroom added on top of `eth_estimateGas`, in percent.
const GAS_ESTIMATE_MARGIN_PERCENT: u64 = 20;

/// A node reached over HTTP JSON-RPC.
///
/// Without a wallet, transactions are sent with `eth_sendTransaction` from the
/// node's unlocked accounts (Anvil, `hardhat node`). With a wallet they are
/// signed locally and broadcast raw.
#[derive(Debug, Clone)]
pub struct RpcChain {
    client: reqwest::Client,
    url: Url,
    wallet: Option<LocalWallet>,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl RpcChain {
    pub fn new(url: Url) -> Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            url,
            wallet: None,
            poll_interval: rpc::DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        })
    }

    /// Sign transactions locally with `wallet`.
    pub fn with_wallet(mut self, wallet: LocalWallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_receipt_timeout(mut self, receipt_timeout: Duration) -> Self {
        self.receipt_timeout = receipt_timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        rpc::json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    async fn quantity(&self, method: &str, params: Vec<Value>) -> Result<u64> {
        let value: String = self.request(method, params).await?;
        rpc::parse_quantity(&value)
    }

    async fn default_sender(&self) -> Result<Address> {
        if let Some(wallet) = &self.wallet {
            return Ok(wallet.address());
        }
        self.accounts()
            .await?
            .first()
            .copied()
            .context("Node exposes no unlocked accounts")
    }

    async fn estimate_gas(&self, tx: &Value, to: Address) -> Result<u64> {
        let estimate = self
            .quantity("eth_estimateGas", vec![tx.clone()])
            .await
            .map_err(|e| into_revert(e, to))?;
        Ok(estimate + estimate * GAS_ESTIMATE_MARGIN_PERCENT / 100)
    }

    async fn send_signed(&self, wallet: &LocalWallet, tx: TxRequest) -> Result<B256> {
        let from = wallet.address();
        let to = tx.to.unwrap_or_default();
        let request = tx_to_json(&tx, from);

        let chain_id = self.chain_id().await?;
        let nonce = self
            .quantity("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await
            .context("Failed to fetch nonce")?;
        let gas_price: String = self
            .request("eth_gasPrice", vec![])
            .await
            .context("Failed to fetch gas price")?;
        let gas_price = u128::from_str_radix(gas_price.trim_start_matches("0x"), 16)
            .context("Invalid gas price")?;
        let gas_limit = match tx.gas {
            Some(gas) => gas,
            None => self.estimate_gas(&request, to).await?,
        };

        let legacy = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: tx.to.map_or(TxKind::Create, TxKind::Call),
            value: tx.value,
            input: tx.data,
        };
        let raw = wallet.sign(&legacy)?;

        tracing::debug!(%from, nonce, gas_limit, gas_price, "Broadcasting signed transaction");

        self.request("eth_sendRawTransaction", vec![json!(raw)])
            .await
            .map_err(|e| into_revert(e, to))
    }
}

/// Turn a node error carrying revert data into [`DeployError::Reverted`].
fn into_revert(err: anyhow::Error, to: Address) -> anyhow::Error {
    match err.downcast_ref::<RpcError>() {
        Some(RpcError {
            data: Some(data), ..
        }) => DeployError::Reverted {
            to,
            data: data.clone(),
        }
        .into(),
        Some(rpc_error) if rpc_error.message.contains("revert") => DeployError::Reverted {
            to,
            data: Bytes::new(),
        }
        .into(),
        _ => err,
    }
}

fn tx_to_json(tx: &TxRequest, from: Address) -> Value {
    let mut request = json!({
        "from": from,
        "value": rpc::quantity(tx.value),
        "data": tx.data,
    });
    if let Some(to) = tx.to {
        request["to"] = json!(to);
    }
    if let Some(gas) = tx.gas {
        request["gas"] = json!(rpc::quantity(gas));
    }
    request
}

impl Chain for RpcChain {
    async fn chain_id(&self) -> Result<u64> {
        self.quantity("eth_chainId", vec![]).await
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        if let Some(wallet) = &self.wallet {
            return Ok(vec![wallet.address()]);
        }
        self.request("eth_accounts", vec![]).await
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256> {
        if let Some(wallet) = &self.wallet {
            return self.send_signed(wallet, tx).await;
        }

        let from = match tx.from {
            Some(from) => from,
            None => self.default_sender().await?,
        };
        let to = tx.to.unwrap_or_default();
        let request = tx_to_json(&tx, from);

        self.request("eth_sendTransaction", vec![request])
            .await
            .map_err(|e| into_revert(e, to))
    }

    async fn wait_for_receipt(&self, tx_hash: B256, confirmations: u64) -> Result<TxReceipt> {
        let confirmations = confirmations.max(1);

        rpc::poll_until(
            &format!("receipt of {}", tx_hash),
            self.receipt_timeout,
            self.poll_interval,
            || async move {
                let receipt: Option<TxReceipt> = self
                    .request("eth_getTransactionReceipt", vec![json!(tx_hash)])
                    .await?;
                let Some(receipt) = receipt else {
                    return Ok(None);
                };

                let head = self.block_number().await?;
                let depth = head.saturating_sub(receipt.block_number) + 1;
                tracing::trace!(%tx_hash, depth, confirmations, "Receipt found");

                Ok((depth >= confirmations).then_some(receipt))
            },
        )
        .await
    }

    async fn call(&self, tx: TxRequest) -> Result<Bytes> {
        let from = tx.from.unwrap_or_default();
        let to = tx.to.unwrap_or_default();
        let request = tx_to_json(&tx, from);

        self.request("eth_call", vec![request, json!("latest")])
            .await
            .map_err(|e| into_revert(e, to))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.request("eth_getBalance", vec![json!(address), json!("latest")])
            .await
    }

    async fn block_number(&self) -> Result<u64> {
        self.quantity("eth_blockNumber", vec![]).await
    }

    async fn block_timestamp(&self) -> Result<u64> {
        let block: Value = self
            .request("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        let timestamp = block["timestamp"]
            .as_str()
            .context("Latest block has no timestamp")?;
        rpc::parse_quantity(timestamp)
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<Log>> {
        self.request(
            "eth_getLogs",
            vec![json!({
                "address": filter.address,
                "topics": [filter.topic0],
                "fromBlock": rpc::quantity(filter.from_block),
                "toBlock": "latest",
            })],
        )
        .await
    }

    async fn increase_time(&self, seconds: u64) -> Result<()> {
        let _: Value = self
            .request("evm_increaseTime", vec![json!(seconds)])
            .await
            .context("evm_increaseTime is only available on development nodes")?;
        Ok(())
    }

    async fn mine(&self) -> Result<()> {
        let _: Value = self
            .request("evm_mine", vec![])
            .await
            .context("evm_mine is only available on development nodes")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_to_json_create() {
        let tx = TxRequest::create(&Bytes::from(vec![0x60]), &Bytes::new());
        let request = tx_to_json(&tx, Address::repeat_byte(0x11));

        assert!(request.get("to").is_none());
        assert_eq!(request["value"], "0x0");
        assert_eq!(request["data"], "0x60");
    }

    #[test]
    fn test_tx_to_json_call_with_value() {
        let tx = TxRequest::call(Address::repeat_byte(0x22), vec![0xab])
            .value(U256::from(255));
        let request = tx_to_json(&tx, Address::repeat_byte(0x11));

        assert_eq!(request["value"], "0xff");
        assert_eq!(
            request["to"],
            "0x2222222222222222222222222222222222222222"
        );
    }

    #[test]
    fn test_into_revert_keeps_payload() {
        let err: anyhow::Error = RpcError {
            code: 3,
            message: "execution reverted".to_string(),
            data: Some(Bytes::from(vec![1, 2, 3, 4])),
        }
        .into();

        let err = into_revert(err, Address::ZERO);
        assert_eq!(
            crate::error::revert_data(&err).unwrap().as_ref(),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn test_into_revert_passes_through_other_errors() {
        let err = into_revert(anyhow::anyhow!("connection refused"), Address::ZERO);
        assert!(err.downcast_ref::<DeployError>().is_none());
    }
}

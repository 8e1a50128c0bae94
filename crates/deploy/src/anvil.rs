//! A throwaway Anvil node serving the `localhost` network.

use std::{process::Stdio, time::Duration};

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use url::Url;

use crate::{chain::RpcChain, network::DEVELOPMENT_CHAIN_ID, rpc};

/// How long a freshly spawned node may take to answer `eth_chainId`.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Builder for Anvil commands.
#[derive(Debug, Clone)]
pub struct AnvilCmdBuilder {
    host: String,
    port: u16,
    chain_id: u64,
    /// `None` mines a block per transaction.
    block_time: Option<u64>,
    accounts: u32,
    extra_args: Vec<String>,
}

impl Default for AnvilCmdBuilder {
    fn default() -> Self {
        Self::new(DEVELOPMENT_CHAIN_ID)
    }
}

impl AnvilCmdBuilder {
    pub fn new(chain_id: u64) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8545,
            chain_id,
            block_time: None,
            accounts: 10,
            extra_args: Vec::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Mine on a fixed interval instead of on every transaction.
    pub fn block_time(mut self, block_time: u64) -> Self {
        self.block_time = Some(block_time);
        self
    }

    pub fn accounts(mut self, accounts: u32) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Endpoint the node will listen on.
    pub fn url(&self) -> Result<Url> {
        Url::parse(&format!("http://{}:{}", self.host, self.port))
            .with_context(|| format!("Invalid anvil endpoint {}:{}", self.host, self.port))
    }

    /// Build the command line arguments.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            self.host,
            "--port".to_string(),
            self.port.to_string(),
            "--chain-id".to_string(),
            self.chain_id.to_string(),
            "--accounts".to_string(),
            self.accounts.to_string(),
        ];

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

/// A running `anvil` process. The process is killed when this is dropped.
#[derive(Debug)]
pub struct AnvilNode {
    child: Child,
    url: Url,
    chain_id: u64,
}

impl AnvilNode {
    /// Start `anvil` and wait until it answers with the expected chain id.
    pub async fn spawn(cmd: AnvilCmdBuilder) -> Result<Self> {
        let url = cmd.url()?;
        let chain_id = cmd.chain_id;
        let args = cmd.build();

        tracing::debug!(?args, "Starting anvil");

        let child = Command::new("anvil")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start anvil, is Foundry installed?")?;

        let client = rpc::create_client()?;
        let (client, endpoint) = (&client, url.as_str());
        let reported = rpc::poll_until(
            "anvil to accept requests",
            STARTUP_TIMEOUT,
            STARTUP_POLL_INTERVAL,
            move || async move {
                let chain_id: String =
                    rpc::json_rpc_call(client, endpoint, "eth_chainId", vec![]).await?;
                Ok(Some(rpc::parse_quantity(&chain_id)?))
            },
        )
        .await?;

        anyhow::ensure!(
            reported == chain_id,
            "anvil at {} reports chain id {} instead of {}",
            url,
            reported,
            chain_id
        );

        tracing::info!(%url, chain_id, "anvil ready");
        Ok(Self {
            child,
            url,
            chain_id,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// A chain backend sending from the node's unlocked accounts.
    pub fn chain(&self) -> Result<RpcChain> {
        Ok(RpcChain::new(self.url.clone())?.with_poll_interval(STARTUP_POLL_INTERVAL))
    }

    pub async fn stop(mut self) -> Result<()> {
        self.child.kill().await.context("Failed to stop anvil")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anvil_cmd_builder() {
        let cmd = AnvilCmdBuilder::default().port(18545).build();

        let chain_id = cmd.iter().position(|arg| arg == "--chain-id").unwrap();
        assert_eq!(cmd[chain_id + 1], "31337");
        let port = cmd.iter().position(|arg| arg == "--port").unwrap();
        assert_eq!(cmd[port + 1], "18545");
        // Automine unless a block time is requested.
        assert!(!cmd.contains(&"--block-time".to_string()));
    }

    #[test]
    fn test_anvil_cmd_builder_block_time() {
        let builder = AnvilCmdBuilder::new(11155111)
            .host("0.0.0.0")
            .block_time(2)
            .extra_args(["--silent"]);
        assert_eq!(builder.url().unwrap().as_str(), "http://0.0.0.0:8545/");

        let cmd = builder.build();
        assert!(cmd.contains(&"11155111".to_string()));
        assert!(cmd.contains(&"--block-time".to_string()));
        assert_eq!(cmd.last().map(String::as_str), Some("--silent"));
    }
}

//! In-process development network.
//!
//! [`SimulatedChain`] stands in for Hardhat's built-in `hardhat` network: ten
//! funded default accounts, one block per transaction, `evm_increaseTime` and
//! `evm_mine`, receipts and logs. It only executes the two contracts this
//! workspace deploys, identified by the marker bytecode of the artifacts
//! returned by [`artifacts`].

mod coordinator;
mod exec;
mod raffle;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, address, keccak256},
    sol_types::SolValue,
};
use anyhow::{Context, Result};

use crate::{
    ArtifactStore, ContractArtifact, DeployError,
    chain::{Chain, Log, LogFilter, TxReceipt, TxRequest},
    contracts::{RAFFLE, Raffle, VRF_COORDINATOR_MOCK, VRFCoordinatorV2Mock},
    network::DEVELOPMENT_CHAIN_ID,
};
use exec::{BlockEnv, Execution, World};

/// Default accounts of a Hardhat development node.
pub const DEFAULT_ACCOUNTS: [Address; 10] = [
    address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
    address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8"),
    address!("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"),
    address!("0x90F79bf6EB2c4f870365E785982E1f101E93b906"),
    address!("0x15d34AAf54267DB7D7c367839AAf71A00a2C6A65"),
    address!("0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc"),
    address!("0x976EA74026E726554dB657fA54763abd0C3a0aa9"),
    address!("0x14dC79964da2C08b23698B3D3cc7Ca32193d9955"),
    address!("0x23618e81E3f5cdF7f54C3d65f7FBc0aBf5B21E8f"),
    address!("0xa0Ee7A142d267C1f36714E4a8F75612F20a79720"),
];

/// Initial balance of each default account, in ether.
const DEFAULT_BALANCE_ETHER: u64 = 10_000;

/// Marker opening the creation code of simulated artifacts. `0xfe` is the
/// INVALID opcode, so a real EVM refuses to run it.
const CODE_MARKER: [u8; 4] = [0xfe, b'S', b'I', b'M'];

/// Contracts the simulated network can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodeKind {
    Raffle = 1,
    Coordinator = 2,
}

impl CodeKind {
    fn bytecode(self) -> Bytes {
        let mut code = CODE_MARKER.to_vec();
        code.push(self as u8);
        code.into()
    }

    /// Split creation data into the contract kind and its constructor arguments.
    pub(crate) fn split(init_code: &[u8]) -> Option<(Self, &[u8])> {
        let rest = init_code.strip_prefix(CODE_MARKER.as_slice())?;
        let (kind, args) = rest.split_first()?;
        let kind = match kind {
            1 => CodeKind::Raffle,
            2 => CodeKind::Coordinator,
            _ => return None,
        };
        Some((kind, args))
    }
}

/// Artifacts deployable on the simulated network.
pub fn artifacts() -> ArtifactStore {
    ArtifactStore::in_memory([
        ContractArtifact {
            contract_name: RAFFLE.to_string(),
            source_name: Some(format!("contracts/{RAFFLE}.sol:{RAFFLE}")),
            abi: Raffle::abi::contract(),
            bytecode: CodeKind::Raffle.bytecode(),
        },
        ContractArtifact {
            contract_name: VRF_COORDINATOR_MOCK.to_string(),
            source_name: Some(format!(
                "contracts/test/{VRF_COORDINATOR_MOCK}.sol:{VRF_COORDINATOR_MOCK}"
            )),
            abi: VRFCoordinatorV2Mock::abi::contract(),
            bytecode: CodeKind::Coordinator.bytecode(),
        },
    ])
}

#[derive(Debug)]
struct Node {
    world: World,
    nonces: HashMap<Address, u64>,
    head: BlockEnv,
    /// Seconds added to the timestamp of the next block.
    time_offset: u64,
    receipts: HashMap<B256, TxReceipt>,
    logs: Vec<Log>,
}

impl Node {
    fn new(genesis_timestamp: u64) -> Self {
        let balance = U256::from(DEFAULT_BALANCE_ETHER) * U256::from(10u64).pow(U256::from(18));
        let mut world = World::default();
        for account in DEFAULT_ACCOUNTS {
            world.balances.insert(account, balance);
        }

        Self {
            world,
            nonces: HashMap::new(),
            head: BlockEnv {
                number: 0,
                timestamp: genesis_timestamp,
            },
            time_offset: 0,
            receipts: HashMap::new(),
            logs: Vec::new(),
        }
    }

    fn pending_block(&self) -> BlockEnv {
        BlockEnv {
            number: self.head.number + 1,
            timestamp: self.head.timestamp + 1 + self.time_offset,
        }
    }

    fn seal(&mut self, block: BlockEnv) {
        self.head = block;
        self.time_offset = 0;
    }

    fn transact(&mut self, tx: TxRequest) -> Result<B256> {
        let from = tx.from.unwrap_or(DEFAULT_ACCOUNTS[0]);
        if self.world.balance(from) < tx.value {
            anyhow::bail!("Sender {} doesn't have enough funds to send tx", from);
        }

        let nonce = self.nonces.get(&from).copied().unwrap_or_default();
        let block = self.pending_block();
        let mut world = self.world.clone();
        let mut exec = Execution::new(&mut world, block);

        let outcome = match tx.to {
            Some(to) => exec.call(from, to, tx.value, &tx.data).map(|_| None),
            None => {
                let address = from.create(nonce);
                exec.create(from, address, tx.value, &tx.data)
                    .map(|()| Some(address))
            }
        };
        let emitted = exec.into_logs();

        let contract_address = outcome.map_err(|revert| DeployError::Reverted {
            to: tx.to.unwrap_or_default(),
            data: revert.data,
        })?;

        self.world = world;
        self.nonces.insert(from, nonce + 1);
        self.seal(block);

        let tx_hash = keccak256((from, U256::from(nonce)).abi_encode());
        let logs: Vec<Log> = emitted
            .into_iter()
            .map(|log| Log {
                address: log.address,
                topics: log.topics,
                data: log.data,
                block_number: block.number,
                transaction_hash: tx_hash,
            })
            .collect();
        self.logs.extend(logs.iter().cloned());

        self.receipts.insert(
            tx_hash,
            TxReceipt {
                transaction_hash: tx_hash,
                block_number: block.number,
                from,
                to: tx.to,
                contract_address,
                status: true,
                logs,
                gas_used: U256::ZERO,
                effective_gas_price: U256::ZERO,
            },
        );

        tracing::trace!(%tx_hash, block = block.number, timestamp = block.timestamp, "Transaction mined");
        Ok(tx_hash)
    }
}

/// The in-process `hardhat` network. Clones share the same chain.
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    node: Arc<Mutex<Node>>,
    chain_id: u64,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    /// A fresh chain whose genesis block carries the current time.
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        Self {
            node: Arc::new(Mutex::new(Node::new(now))),
            chain_id: DEVELOPMENT_CHAIN_ID,
        }
    }

    /// Report `chain_id` instead of the development chain id, to stand in
    /// for another network in tests.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Artifacts this chain can deploy.
    pub fn artifacts(&self) -> ArtifactStore {
        artifacts()
    }

    fn node(&self) -> Result<MutexGuard<'_, Node>> {
        self.node
            .lock()
            .map_err(|_| anyhow::anyhow!("Simulated chain state is poisoned"))
    }
}

impl Chain for SimulatedChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(DEFAULT_ACCOUNTS.to_vec())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256> {
        self.node()?.transact(tx)
    }

    async fn wait_for_receipt(&self, tx_hash: B256, confirmations: u64) -> Result<TxReceipt> {
        let mut node = self.node()?;
        let receipt = node
            .receipts
            .get(&tx_hash)
            .cloned()
            .with_context(|| format!("Unknown transaction {}", tx_hash))?;

        // Automine: bury the receipt under empty blocks until deep enough.
        while node.head.number + 1 < receipt.block_number + confirmations {
            let block = node.pending_block();
            node.seal(block);
        }

        Ok(receipt)
    }

    async fn call(&self, tx: TxRequest) -> Result<Bytes> {
        let node = self.node()?;
        let to = tx.to.context("Calls need a target address")?;
        let mut world = node.world.clone();
        let mut exec = Execution::new(&mut world, node.head);

        exec.call(tx.from.unwrap_or_default(), to, tx.value, &tx.data)
            .map_err(|revert| {
                DeployError::Reverted {
                    to,
                    data: revert.data,
                }
                .into()
            })
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.node()?.world.balance(address))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.node()?.head.number)
    }

    async fn block_timestamp(&self) -> Result<u64> {
        Ok(self.node()?.head.timestamp)
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<Log>> {
        Ok(self
            .node()?
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn increase_time(&self, seconds: u64) -> Result<()> {
        self.node()?.time_offset += seconds;
        Ok(())
    }

    async fn mine(&self) -> Result<()> {
        let mut node = self.node()?;
        let block = node.pending_block();
        node.seal(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::CoordinatorConstructorArgs;
    use alloy_core::sol_types::SolCall;

    async fn deploy_coordinator(chain: &SimulatedChain) -> Address {
        let args = CoordinatorConstructorArgs {
            base_fee: U256::from(1),
            gas_price_link: U256::from(1),
        }
        .abi_encode();
        let tx = TxRequest::create(&CodeKind::Coordinator.bytecode(), &args);

        let hash = chain.send_transaction(tx).await.unwrap();
        chain
            .wait_for_receipt(hash, 1)
            .await
            .unwrap()
            .contract_address
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_address_follows_sender_nonce() {
        let chain = SimulatedChain::new();

        let first = deploy_coordinator(&chain).await;
        let second = deploy_coordinator(&chain).await;

        assert_eq!(
            first,
            address!("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert_ne!(first, second);
        assert_eq!(chain.block_number().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_increase_time_applies_to_next_block() {
        let chain = SimulatedChain::new();
        let before = chain.block_timestamp().await.unwrap();

        chain.increase_time(61).await.unwrap();
        chain.mine().await.unwrap();

        assert_eq!(chain.block_timestamp().await.unwrap(), before + 62);

        chain.mine().await.unwrap();
        assert_eq!(chain.block_timestamp().await.unwrap(), before + 63);
    }

    #[tokio::test]
    async fn test_wait_for_receipt_mines_confirmations() {
        let chain = SimulatedChain::new();
        let hash = chain
            .send_transaction(TxRequest::call(DEFAULT_ACCOUNTS[1], Bytes::new()).value(U256::from(1)))
            .await
            .unwrap();

        let receipt = chain.wait_for_receipt(hash, 3).await.unwrap();

        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.block_number().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_not_mined() {
        let chain = SimulatedChain::new();
        let coordinator = deploy_coordinator(&chain).await;
        let head = chain.block_number().await.unwrap();

        let fund = VRFCoordinatorV2Mock::fundSubscriptionCall {
            subId: 42,
            amount: Default::default(),
        };
        let err = chain
            .send_transaction(TxRequest::call(coordinator, fund.abi_encode()))
            .await
            .unwrap_err();

        assert!(crate::error::is_revert_of::<VRFCoordinatorV2Mock::InvalidSubscription>(&err));
        assert_eq!(chain.block_number().await.unwrap(), head);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let chain = SimulatedChain::new();
        let other = chain.clone();

        chain.mine().await.unwrap();

        assert_eq!(other.block_number().await.unwrap(), 1);
    }

    #[test]
    fn test_code_marker_split() {
        let mut code = CodeKind::Raffle.bytecode().to_vec();
        code.extend_from_slice(&[1, 2, 3]);

        let (kind, args) = CodeKind::split(&code).unwrap();
        assert_eq!(kind, CodeKind::Raffle);
        assert_eq!(args, &[1, 2, 3]);

        assert!(CodeKind::split(&[0x60, 0x80]).is_none());
    }
}

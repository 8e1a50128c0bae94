//! Message-call execution against the simulated world state.

use std::collections::HashMap;

use alloy_core::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::{SolError, SolEvent},
};

use super::{CodeKind, coordinator::MockCoordinator, raffle::RaffleContract};

/// Code living at a contract address.
#[derive(Debug, Clone)]
pub(crate) enum Contract {
    Raffle(RaffleContract),
    Coordinator(MockCoordinator),
}

/// Block a message call executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
}

/// Caller context of a message call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Msg {
    /// The contract being executed.
    pub address: Address,
    pub sender: Address,
    pub value: U256,
}

/// Revert payload of a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Revert {
    pub data: Bytes,
}

impl Revert {
    pub fn with<E: SolError>(error: E) -> Self {
        Self {
            data: error.abi_encode().into(),
        }
    }
}

pub(crate) type CallResult = Result<Bytes, Revert>;

/// A log emitted during execution, before it is placed in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmittedLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Balances and contract storage.
#[derive(Debug, Clone, Default)]
pub(crate) struct World {
    pub balances: HashMap<Address, U256>,
    pub contracts: HashMap<Address, Contract>,
}

impl World {
    pub fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }
}

/// A call tree executing on a working copy of the world.
///
/// Nested calls snapshot the world and roll back when they revert, so a caller
/// that tolerates a failing callee keeps its own changes.
pub(crate) struct Execution<'w> {
    pub world: &'w mut World,
    pub block: BlockEnv,
    logs: Vec<EmittedLog>,
}

impl<'w> Execution<'w> {
    pub fn new(world: &'w mut World, block: BlockEnv) -> Self {
        Self {
            world,
            block,
            logs: Vec::new(),
        }
    }

    pub fn into_logs(self) -> Vec<EmittedLog> {
        self.logs
    }

    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<(), Revert> {
        if value.is_zero() {
            return Ok(());
        }

        let available = self.world.balance(from);
        if available < value {
            return Err(Revert::default());
        }

        self.world.balances.insert(from, available - value);
        *self.world.balances.entry(to).or_default() += value;
        Ok(())
    }

    pub fn emit<E: SolEvent>(&mut self, address: Address, event: &E) {
        let log = event.encode_log_data();
        self.logs.push(EmittedLog {
            address,
            topics: log.topics().to_vec(),
            data: log.data,
        });
    }

    /// Message call from `sender` to `to`.
    pub fn call(&mut self, sender: Address, to: Address, value: U256, data: &[u8]) -> CallResult {
        let snapshot = self.world.clone();
        let logs_before = self.logs.len();

        let result = self.dispatch(Msg {
            address: to,
            sender,
            value,
        }, data);

        if result.is_err() {
            *self.world = snapshot;
            self.logs.truncate(logs_before);
        }
        result
    }

    fn dispatch(&mut self, msg: Msg, data: &[u8]) -> CallResult {
        self.transfer(msg.sender, msg.address, msg.value)?;

        let kind = self.world.contracts.get(&msg.address).map(|contract| match contract {
            Contract::Raffle(_) => CodeKind::Raffle,
            Contract::Coordinator(_) => CodeKind::Coordinator,
        });

        match kind {
            Some(CodeKind::Raffle) => super::raffle::execute(self, msg, data),
            Some(CodeKind::Coordinator) => super::coordinator::execute(self, msg, data),
            // Plain accounts accept anything.
            None => Ok(Bytes::new()),
        }
    }

    /// Contract creation at `address` from `init_code` (code marker followed by
    /// constructor arguments).
    pub fn create(
        &mut self,
        sender: Address,
        address: Address,
        value: U256,
        init_code: &[u8],
    ) -> Result<(), Revert> {
        let (kind, args) = CodeKind::split(init_code).ok_or_else(Revert::default)?;

        self.transfer(sender, address, value)?;

        let contract = match kind {
            CodeKind::Raffle => {
                Contract::Raffle(RaffleContract::construct(args, self.block.timestamp)?)
            }
            CodeKind::Coordinator => Contract::Coordinator(MockCoordinator::construct(args)?),
        };
        self.world.contracts.insert(address, contract);
        Ok(())
    }

    pub fn raffle(&mut self, address: Address) -> Result<&mut RaffleContract, Revert> {
        match self.world.contracts.get_mut(&address) {
            Some(Contract::Raffle(raffle)) => Ok(raffle),
            _ => Err(Revert::default()),
        }
    }

    pub fn coordinator(&mut self, address: Address) -> Result<&mut MockCoordinator, Revert> {
        match self.world.contracts.get_mut(&address) {
            Some(Contract::Coordinator(coordinator)) => Ok(coordinator),
            _ => Err(Revert::default()),
        }
    }
}

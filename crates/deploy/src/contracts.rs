//! Solidity interfaces of the contracts the deployment scripts talk to.
//!
//! Only the callable surface is declared here. The contract code lives in the
//! Solidity project that produced the artifacts.

use alloy_core::{
    primitives::{Address, B256, Bytes, U256},
    sol,
    sol_types::SolValue,
};

/// Name under which the raffle contract is deployed and looked up.
pub const RAFFLE: &str = "Raffle";

/// Name under which the mock VRF coordinator is deployed and looked up.
pub const VRF_COORDINATOR_MOCK: &str = "VRFCoordinatorV2Mock";

sol! {
    #[sol(abi)]
    #[derive(Debug, PartialEq, Eq)]
    contract Raffle {
        error Raffle__SendMoreToEnterRaffle();
        error Raffle__RaffleNotOpen();
        error Raffle__UpkeepNotNeeded(uint256 currentBalance, uint256 numPlayers, uint256 raffleState);
        error Raffle__TransferFailed();
        error Raffle__IndexOutOfBounds(uint256 index);
        error OnlyCoordinatorCanFulfill(address have, address want);

        event RaffleEnter(address indexed player);
        event RequestedRaffleWinner(uint256 indexed requestId);
        event WinnerPicked(address indexed player);

        constructor(
            address vrfCoordinatorV2,
            uint256 entranceFee,
            uint256 subscriptionId,
            uint32 callbackGasLimit,
            bytes32 gasLane,
            uint256 interval
        );

        function enterRaffle() external payable;
        function checkUpkeep() external view returns (bool upkeepNeeded);
        function performUpkeep() external;
        function rawFulfillRandomWords(uint256 requestId, uint256[] memory randomWords) external;

        function getPlayer(uint256 index) external view returns (address);
        function getAllPlayers() external view returns (address[] memory);
        function getNumberOfPlayers() external view returns (uint256);
        function getRecentWinner() external view returns (address);
        function getRaffleState() external view returns (uint8);
        function getLastTimeStamp() external view returns (uint256);
        function getInterval() external view returns (uint256);
        function getEntranceFee() external view returns (uint256);
        function getBalance() external view returns (uint256);
    }
}

// Chainlink's `VRFCoordinatorV2Mock`: subscription ids are `uint64` and
// amounts `uint96`.
sol! {
    #[sol(abi)]
    #[derive(Debug, PartialEq, Eq)]
    contract VRFCoordinatorV2Mock {
        error InvalidSubscription();
        error InsufficientBalance();
        error MustBeSubOwner(address owner);
        error TooManyConsumers();
        error InvalidConsumer();
        error InvalidRandomWords();

        event SubscriptionCreated(uint64 indexed subId, address owner);
        event SubscriptionFunded(uint64 indexed subId, uint256 oldBalance, uint256 newBalance);
        event ConsumerAdded(uint64 indexed subId, address consumer);
        event RandomWordsRequested(
            bytes32 indexed keyHash,
            uint256 requestId,
            uint256 preSeed,
            uint64 indexed subId,
            uint16 minimumRequestConfirmations,
            uint32 callbackGasLimit,
            uint32 numWords,
            address indexed sender
        );
        event RandomWordsFulfilled(uint256 indexed requestId, uint256 outputSeed, uint96 payment, bool success);

        constructor(uint96 baseFee, uint96 gasPriceLink);

        function createSubscription() external returns (uint64 subId);
        function fundSubscription(uint64 subId, uint96 amount) external;
        function addConsumer(uint64 subId, address consumer) external;
        function consumerIsAdded(uint64 subId, address consumer) external view returns (bool);
        function requestRandomWords(
            bytes32 keyHash,
            uint64 subId,
            uint16 minimumRequestConfirmations,
            uint32 callbackGasLimit,
            uint32 numWords
        ) external returns (uint256 requestId);
        function fulfillRandomWords(uint256 requestId, address consumer) external;
        function getSubscription(uint64 subId)
            external
            view
            returns (uint96 balance, uint64 reqCount, address owner, address[] memory consumers);
    }
}

/// Reason string of `fulfillRandomWords` for an unknown request.
pub const NONEXISTENT_REQUEST: &str = "nonexistent request";

/// Narrow a subscription id to the mock coordinator's `uint64`.
pub fn mock_subscription_id(subscription_id: U256) -> anyhow::Result<u64> {
    u64::try_from(subscription_id).map_err(|_| {
        anyhow::anyhow!("Subscription id {} does not fit the mock coordinator's uint64", subscription_id)
    })
}

/// Raffle lifecycle as reported by `getRaffleState()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RaffleState {
    Open,
    Calculating,
}

impl RaffleState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RaffleState::Open),
            1 => Some(RaffleState::Calculating),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Constructor arguments of the raffle, in the order the contract expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaffleConstructorArgs {
    pub vrf_coordinator: Address,
    pub entrance_fee: U256,
    pub subscription_id: U256,
    pub callback_gas_limit: u32,
    pub gas_lane: B256,
    pub interval: U256,
}

impl RaffleConstructorArgs {
    /// ABI-encode the arguments as constructor parameters.
    pub fn abi_encode(&self) -> Bytes {
        (
            self.vrf_coordinator,
            self.entrance_fee,
            self.subscription_id,
            self.callback_gas_limit,
            self.gas_lane,
            self.interval,
        )
            .abi_encode_params()
            .into()
    }

    /// Decode constructor parameters produced by [`Self::abi_encode`].
    pub fn abi_decode(data: &[u8]) -> anyhow::Result<Self> {
        let (vrf_coordinator, entrance_fee, subscription_id, callback_gas_limit, gas_lane, interval) =
            <(Address, U256, U256, u32, B256, U256)>::abi_decode_params(data)?;

        Ok(Self {
            vrf_coordinator,
            entrance_fee,
            subscription_id,
            callback_gas_limit,
            gas_lane,
            interval,
        })
    }
}

/// Constructor arguments of the mock coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConstructorArgs {
    pub base_fee: U256,
    pub gas_price_link: U256,
}

impl CoordinatorConstructorArgs {
    /// ABI-encode the arguments. `uint96` and `uint256` share the same word layout.
    pub fn abi_encode(&self) -> Bytes {
        (self.base_fee, self.gas_price_link).abi_encode_params().into()
    }

    pub fn abi_decode(data: &[u8]) -> anyhow::Result<Self> {
        let (base_fee, gas_price_link) = <(U256, U256)>::abi_decode_params(data)?;
        Ok(Self {
            base_fee,
            gas_price_link,
        })
    }
}

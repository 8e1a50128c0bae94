//! Raffle semantics on the simulated network.

use alloy_core::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::{SolCall, SolInterface, SolValue},
};

use super::exec::{CallResult, Execution, Msg, Revert};
use crate::contracts::{
    Raffle::{self, RaffleCalls},
    RaffleConstructorArgs, RaffleState,
    VRFCoordinatorV2Mock,
};

/// Confirmations the raffle asks the coordinator to wait for.
const REQUEST_CONFIRMATIONS: u16 = 3;

/// Random words requested per round.
const NUM_WORDS: u32 = 1;

#[derive(Debug, Clone)]
pub(crate) struct RaffleContract {
    coordinator: Address,
    entrance_fee: U256,
    subscription_id: U256,
    callback_gas_limit: u32,
    gas_lane: B256,
    interval: U256,
    players: Vec<Address>,
    recent_winner: Address,
    state: RaffleState,
    last_timestamp: U256,
}

impl RaffleContract {
    pub fn construct(args: &[u8], timestamp: u64) -> Result<Self, Revert> {
        let args = RaffleConstructorArgs::abi_decode(args).map_err(|_| Revert::default())?;

        Ok(Self {
            coordinator: args.vrf_coordinator,
            entrance_fee: args.entrance_fee,
            subscription_id: args.subscription_id,
            callback_gas_limit: args.callback_gas_limit,
            gas_lane: args.gas_lane,
            interval: args.interval,
            players: Vec::new(),
            recent_winner: Address::ZERO,
            state: RaffleState::Open,
            last_timestamp: U256::from(timestamp),
        })
    }

    fn upkeep_needed(&self, balance: U256, timestamp: u64) -> bool {
        let elapsed = U256::from(timestamp).saturating_sub(self.last_timestamp);

        self.state == RaffleState::Open
            && elapsed > self.interval
            && !self.players.is_empty()
            && !balance.is_zero()
    }
}

fn returns<T: SolValue>(value: T) -> Bytes {
    (value,).abi_encode_params().into()
}

pub(crate) fn execute(exec: &mut Execution<'_>, msg: Msg, data: &[u8]) -> CallResult {
    let call = RaffleCalls::abi_decode(data).map_err(|_| Revert::default())?;

    if !msg.value.is_zero() && !matches!(call, RaffleCalls::enterRaffle(_)) {
        // Only enterRaffle is payable.
        return Err(Revert::default());
    }

    match call {
        RaffleCalls::enterRaffle(_) => enter(exec, msg),
        RaffleCalls::checkUpkeep(_) => {
            let balance = exec.world.balance(msg.address);
            let timestamp = exec.block.timestamp;
            let needed = exec.raffle(msg.address)?.upkeep_needed(balance, timestamp);
            Ok(returns(needed))
        }
        RaffleCalls::performUpkeep(_) => perform_upkeep(exec, msg),
        RaffleCalls::rawFulfillRandomWords(call) => {
            fulfill_random_words(exec, msg, call.requestId, &call.randomWords)
        }
        RaffleCalls::getPlayer(call) => {
            let raffle = exec.raffle(msg.address)?;
            let player = usize::try_from(call.index)
                .ok()
                .and_then(|index| raffle.players.get(index))
                .copied()
                .ok_or_else(|| Revert::with(Raffle::Raffle__IndexOutOfBounds { index: call.index }))?;
            Ok(returns(player))
        }
        RaffleCalls::getAllPlayers(_) => Ok(returns(exec.raffle(msg.address)?.players.clone())),
        RaffleCalls::getNumberOfPlayers(_) => {
            Ok(returns(U256::from(exec.raffle(msg.address)?.players.len())))
        }
        RaffleCalls::getRecentWinner(_) => Ok(returns(exec.raffle(msg.address)?.recent_winner)),
        RaffleCalls::getRaffleState(_) => Ok(Raffle::getRaffleStateCall::abi_encode_returns(&exec.raffle(msg.address)?.state.as_u8()).into()),
        RaffleCalls::getLastTimeStamp(_) => Ok(returns(exec.raffle(msg.address)?.last_timestamp)),
        RaffleCalls::getInterval(_) => Ok(returns(exec.raffle(msg.address)?.interval)),
        RaffleCalls::getEntranceFee(_) => Ok(returns(exec.raffle(msg.address)?.entrance_fee)),
        RaffleCalls::getBalance(_) => Ok(returns(exec.world.balance(msg.address))),
    }
}

fn enter(exec: &mut Execution<'_>, msg: Msg) -> CallResult {
    let raffle = exec.raffle(msg.address)?;

    if msg.value < raffle.entrance_fee {
        return Err(Revert::with(Raffle::Raffle__SendMoreToEnterRaffle {}));
    }
    if raffle.state != RaffleState::Open {
        return Err(Revert::with(Raffle::Raffle__RaffleNotOpen {}));
    }

    raffle.players.push(msg.sender);
    exec.emit(msg.address, &Raffle::RaffleEnter { player: msg.sender });
    Ok(Bytes::new())
}

fn perform_upkeep(exec: &mut Execution<'_>, msg: Msg) -> CallResult {
    let balance = exec.world.balance(msg.address);
    let timestamp = exec.block.timestamp;
    let raffle = exec.raffle(msg.address)?;

    if !raffle.upkeep_needed(balance, timestamp) {
        return Err(Revert::with(Raffle::Raffle__UpkeepNotNeeded {
            currentBalance: balance,
            numPlayers: U256::from(raffle.players.len()),
            raffleState: U256::from(raffle.state.as_u8()),
        }));
    }

    let subscription_id = u64::try_from(raffle.subscription_id).map_err(|_| Revert::default())?;
    raffle.state = RaffleState::Calculating;
    let coordinator = raffle.coordinator;
    let request = VRFCoordinatorV2Mock::requestRandomWordsCall {
        keyHash: raffle.gas_lane,
        subId: subscription_id,
        minimumRequestConfirmations: REQUEST_CONFIRMATIONS,
        callbackGasLimit: raffle.callback_gas_limit,
        numWords: NUM_WORDS,
    };

    let output = exec.call(msg.address, coordinator, U256::ZERO, &request.abi_encode())?;
    let request_id = U256::abi_decode(&output).map_err(|_| Revert::default())?;

    exec.emit(
        msg.address,
        &Raffle::RequestedRaffleWinner {
            requestId: request_id,
        },
    );
    Ok(Bytes::new())
}

fn fulfill_random_words(
    exec: &mut Execution<'_>,
    msg: Msg,
    request_id: U256,
    random_words: &[U256],
) -> CallResult {
    let timestamp = exec.block.timestamp;
    let raffle = exec.raffle(msg.address)?;

    if msg.sender != raffle.coordinator {
        return Err(Revert::with(Raffle::OnlyCoordinatorCanFulfill {
            have: msg.sender,
            want: raffle.coordinator,
        }));
    }

    let word = random_words.first().ok_or_else(Revert::default)?;
    let count = U256::from(raffle.players.len());
    if count.is_zero() {
        // Modulo by zero panics in the contract.
        return Err(Revert::default());
    }
    let index = usize::try_from(*word % count).map_err(|_| Revert::default())?;
    let winner = raffle.players[index];

    raffle.recent_winner = winner;
    raffle.state = RaffleState::Open;
    raffle.players.clear();
    raffle.last_timestamp = U256::from(timestamp);

    let prize = exec.world.balance(msg.address);
    exec.transfer(msg.address, winner, prize)
        .map_err(|_| Revert::with(Raffle::Raffle__TransferFailed {}))?;

    tracing::trace!(%request_id, %winner, %prize, "Raffle winner picked");
    exec.emit(msg.address, &Raffle::WinnerPicked { player: winner });
    Ok(Bytes::new())
}

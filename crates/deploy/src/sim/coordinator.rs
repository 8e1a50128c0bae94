//! Mock VRF coordinator semantics on the simulated network.

use std::collections::BTreeMap;

use alloy_core::{
    primitives::{Address, Bytes, U256, aliases::U96, keccak256},
    sol_types::{self, SolCall, SolInterface, SolValue},
};

use super::exec::{CallResult, Execution, Msg, Revert};
use crate::contracts::{
    CoordinatorConstructorArgs, NONEXISTENT_REQUEST, Raffle,
    VRFCoordinatorV2Mock::{self, VRFCoordinatorV2MockCalls},
};

/// Gas the simulated consumer callback is billed for.
const CALLBACK_GAS_USED: u64 = 100_000;

/// First request id handed out.
const FIRST_REQUEST_ID: u64 = 1;

/// First pre-seed reported in `RandomWordsRequested`.
const FIRST_PRE_SEED: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    owner: Address,
    balance: U256,
    req_count: u64,
    consumers: Vec<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Request {
    subscription_id: u64,
    num_words: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct MockCoordinator {
    base_fee: U256,
    gas_price_link: U256,
    current_subscription_id: u64,
    next_request_id: u64,
    next_pre_seed: u64,
    subscriptions: BTreeMap<u64, Subscription>,
    requests: BTreeMap<U256, Request>,
}

impl MockCoordinator {
    pub fn construct(args: &[u8]) -> Result<Self, Revert> {
        let args = CoordinatorConstructorArgs::abi_decode(args).map_err(|_| Revert::default())?;

        Ok(Self {
            base_fee: args.base_fee,
            gas_price_link: args.gas_price_link,
            current_subscription_id: 0,
            next_request_id: FIRST_REQUEST_ID,
            next_pre_seed: FIRST_PRE_SEED,
            subscriptions: BTreeMap::new(),
            requests: BTreeMap::new(),
        })
    }

    fn subscription(&mut self, id: u64) -> Result<&mut Subscription, Revert> {
        self.subscriptions
            .get_mut(&id)
            .ok_or_else(|| Revert::with(VRFCoordinatorV2Mock::InvalidSubscription {}))
    }

    fn owned_subscription(&mut self, id: u64, caller: Address) -> Result<&mut Subscription, Revert> {
        let subscription = self.subscription(id)?;
        if subscription.owner != caller {
            return Err(Revert::with(VRFCoordinatorV2Mock::MustBeSubOwner {
                owner: subscription.owner,
            }));
        }
        Ok(subscription)
    }

    fn consumer_is_added(&self, id: u64, consumer: Address) -> bool {
        self.subscriptions
            .get(&id)
            .is_some_and(|subscription| subscription.consumers.contains(&consumer))
    }
}

fn returns<T: SolValue>(value: T) -> Bytes {
    (value,).abi_encode_params().into()
}

pub(crate) fn execute(exec: &mut Execution<'_>, msg: Msg, data: &[u8]) -> CallResult {
    let call = VRFCoordinatorV2MockCalls::abi_decode(data).map_err(|_| Revert::default())?;

    if !msg.value.is_zero() {
        return Err(Revert::default());
    }

    match call {
        VRFCoordinatorV2MockCalls::createSubscription(_) => {
            let coordinator = exec.coordinator(msg.address)?;
            coordinator.current_subscription_id += 1;
            let id = coordinator.current_subscription_id;
            coordinator.subscriptions.insert(
                id,
                Subscription {
                    owner: msg.sender,
                    balance: U256::ZERO,
                    req_count: 0,
                    consumers: Vec::new(),
                },
            );

            exec.emit(
                msg.address,
                &VRFCoordinatorV2Mock::SubscriptionCreated {
                    subId: id,
                    owner: msg.sender,
                },
            );
            Ok(returns(id))
        }
        VRFCoordinatorV2MockCalls::fundSubscription(call) => {
            let subscription = exec.coordinator(msg.address)?.subscription(call.subId)?;
            let old_balance = subscription.balance;
            subscription.balance += U256::from(call.amount);
            let new_balance = subscription.balance;

            exec.emit(
                msg.address,
                &VRFCoordinatorV2Mock::SubscriptionFunded {
                    subId: call.subId,
                    oldBalance: old_balance,
                    newBalance: new_balance,
                },
            );
            Ok(Bytes::new())
        }
        VRFCoordinatorV2MockCalls::addConsumer(call) => {
            let subscription = exec
                .coordinator(msg.address)?
                .owned_subscription(call.subId, msg.sender)?;
            if subscription.consumers.contains(&call.consumer) {
                return Ok(Bytes::new());
            }
            subscription.consumers.push(call.consumer);

            exec.emit(
                msg.address,
                &VRFCoordinatorV2Mock::ConsumerAdded {
                    subId: call.subId,
                    consumer: call.consumer,
                },
            );
            Ok(Bytes::new())
        }
        VRFCoordinatorV2MockCalls::consumerIsAdded(call) => {
            let added = exec
                .coordinator(msg.address)?
                .consumer_is_added(call.subId, call.consumer);
            Ok(returns(added))
        }
        VRFCoordinatorV2MockCalls::requestRandomWords(call) => {
            let coordinator = exec.coordinator(msg.address)?;
            coordinator.subscription(call.subId)?;
            if !coordinator.consumer_is_added(call.subId, msg.sender) {
                return Err(Revert::with(VRFCoordinatorV2Mock::InvalidConsumer {}));
            }

            let request_id = U256::from(coordinator.next_request_id);
            let pre_seed = U256::from(coordinator.next_pre_seed);
            coordinator.next_request_id += 1;
            coordinator.next_pre_seed += 1;
            coordinator.subscription(call.subId)?.req_count += 1;
            coordinator.requests.insert(
                request_id,
                Request {
                    subscription_id: call.subId,
                    num_words: call.numWords,
                },
            );

            exec.emit(
                msg.address,
                &VRFCoordinatorV2Mock::RandomWordsRequested {
                    keyHash: call.keyHash,
                    requestId: request_id,
                    preSeed: pre_seed,
                    subId: call.subId,
                    minimumRequestConfirmations: call.minimumRequestConfirmations,
                    callbackGasLimit: call.callbackGasLimit,
                    numWords: call.numWords,
                    sender: msg.sender,
                },
            );
            Ok(returns(request_id))
        }
        VRFCoordinatorV2MockCalls::fulfillRandomWords(call) => {
            fulfill_random_words(exec, msg, call.requestId, call.consumer)
        }
        VRFCoordinatorV2MockCalls::getSubscription(call) => {
            let coordinator = exec.coordinator(msg.address)?;
            let subscription = coordinator.subscription(call.subId)?;
            // uint96 shares the word layout of uint256.
            Ok((
                subscription.balance,
                subscription.req_count,
                subscription.owner,
                subscription.consumers.clone(),
            )
                .abi_encode_params()
                .into())
        }
    }
}

/// Deterministic words: `keccak256(abi.encode(requestId, i))`.
fn random_words(request_id: U256, count: u32) -> Vec<U256> {
    (0..count)
        .map(|i| U256::from_be_bytes(keccak256((request_id, U256::from(i)).abi_encode()).0))
        .collect()
}

fn fulfill_random_words(
    exec: &mut Execution<'_>,
    msg: Msg,
    request_id: U256,
    consumer: Address,
) -> CallResult {
    let coordinator = exec.coordinator(msg.address)?;
    let request = coordinator
        .requests
        .remove(&request_id)
        .ok_or_else(|| Revert::with(sol_types::Revert {
            reason: NONEXISTENT_REQUEST.to_string(),
        }))?;
    let payment = coordinator.base_fee + coordinator.gas_price_link * U256::from(CALLBACK_GAS_USED);

    let callback = Raffle::rawFulfillRandomWordsCall {
        requestId: request_id,
        randomWords: random_words(request_id, request.num_words),
    };
    // A failing consumer is reported, not propagated.
    let success = exec
        .call(msg.address, consumer, U256::ZERO, &callback.abi_encode())
        .is_ok();

    let subscription = exec
        .coordinator(msg.address)?
        .subscription(request.subscription_id)?;
    if subscription.balance < payment {
        return Err(Revert::with(VRFCoordinatorV2Mock::InsufficientBalance {}));
    }
    subscription.balance -= payment;

    exec.emit(
        msg.address,
        &VRFCoordinatorV2Mock::RandomWordsFulfilled {
            requestId: request_id,
            outputSeed: request_id,
            payment: U96::saturating_from(payment),
            success,
        },
    );
    Ok(Bytes::new())
}

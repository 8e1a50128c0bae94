//! raffle-deploy - Deployment and test tooling for the decentralized raffle.
//!
//! This crate deploys the raffle contract (and, on development networks, a
//! mock VRF coordinator with a funded subscription), verifies it on public
//! explorers, publishes its ABI and address to the frontend, and drives full
//! raffle rounds against a local or live network.
//!
//! Development networks are served by an in-process chain ([`SimulatedChain`])
//! that executes the raffle and the coordinator natively, so the whole
//! workflow runs without any external node.

pub mod anvil;
pub use anvil::{AnvilCmdBuilder, AnvilNode};

mod artifact;
pub use artifact::{ArtifactStore, ContractArtifact};

mod error;
pub use error::{DeployError, is_revert_of, revert_data, revert_reason};

pub mod chain;
pub use chain::{Chain, Log, LogFilter, RpcChain, TxReceipt, TxRequest};

pub mod config;
pub use config::{CONFIG_FILENAME, Connection, RaffleConfig};

pub mod contracts;
pub use contracts::RaffleState;

pub mod deployments;
pub use deployments::{DeployOptions, Deployments, DeploymentRecord};

pub mod exporter;
pub use exporter::{FrontendAddressMap, FrontendExporter, FrontendPaths};

pub mod harness;
pub use harness::{EventOutcome, LiveHarness, LocalHarness, RoundReport, wait_for_event};

pub mod network;
pub use network::{NetworkConfig, NetworkProfile, is_development_network};

pub mod orchestrator;
pub use orchestrator::{DeploySettings, DeployTag, DeploymentOutcome, Orchestrator};

pub mod provisioner;
pub use provisioner::{MockOracleProvisioner, SubscriptionHandle, SubscriptionIdLocation};

pub mod raffle;
pub use raffle::{CoordinatorClient, RaffleClient, SubscriptionInfo};

pub mod rpc;

pub mod sim;
pub use sim::SimulatedChain;

pub mod verify;
pub use verify::{EtherscanVerifier, VerificationOutcome, VerificationRequest};

//! Typed failures of the deployment pipeline.
//!
//! Functions in this crate return [`anyhow::Result`] and attach context as the
//! error travels up. The variants below are the conditions callers are expected
//! to branch on; recover them with `err.downcast_ref::<DeployError>()`.

use alloy_core::primitives::{Address, Bytes, U256};

/// Failure conditions raised by the deployment workflow.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum DeployError {
    /// No network profile is known for the requested chain id or network name.
    #[display("no network configuration for {network}")]
    ConfigurationMissing {
        network: String,
    },

    /// The connected node reports a chain id other than the active profile's.
    #[display("network {network} expects chain id {expected} but the node reports {actual}")]
    ChainIdMismatch {
        network: String,
        expected: u64,
        actual: u64,
    },

    /// A public network profile lacks the coordinator address or subscription id.
    #[display("network {network} has no {missing} configured for the VRF coordinator")]
    MissingOracleBinding {
        network: String,
        missing: &'static str,
    },

    /// A subscription operation referenced an id this provisioner never created.
    #[display("subscription {subscription_id} was not created by this provisioner")]
    UnknownSubscription {
        subscription_id: U256,
    },

    /// A lookup by name for a contract that has no deployment record.
    #[display("no deployment recorded for {name}")]
    UnknownDeployment {
        name: String,
    },

    /// A deployment transaction reverted or never reached the requested depth.
    #[display("deployment of {contract} failed: {reason}")]
    DeploymentFailed {
        contract: String,
        reason: String,
    },

    /// A contract call or transaction reverted.
    #[display("execution reverted (to {to}, data {data})")]
    Reverted {
        to: Address,
        data: Bytes,
    },

    /// An expected event was not observed before the deadline.
    #[display("timed out after {timeout_secs}s waiting for {event}")]
    EventTimeout {
        event: &'static str,
        timeout_secs: u64,
    },

    /// A persisted file could not be parsed.
    #[display("malformed persisted state in {path}: {reason}")]
    MalformedPersistedState {
        path: String,
        reason: String,
    },
}

impl DeployError {
    /// Returns the revert payload if this error is a revert.
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            DeployError::Reverted { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Extract the revert payload from an error chain, if any link is a revert.
pub fn revert_data(err: &anyhow::Error) -> Option<&Bytes> {
    err.downcast_ref::<DeployError>()
        .and_then(DeployError::revert_data)
}

/// Returns true when the error chain is a revert whose payload decodes as `E`.
pub fn is_revert_of<E: alloy_core::sol_types::SolError>(err: &anyhow::Error) -> bool {
    revert_data(err).is_some_and(|data| E::abi_decode(data).is_ok())
}

/// The message of an `Error(string)` revert, e.g. a Solidity `require`.
pub fn revert_reason(err: &anyhow::Error) -> Option<String> {
    use alloy_core::sol_types::{Revert, SolError};

    revert_data(err)
        .and_then(|data| Revert::abi_decode(data).ok())
        .map(|revert| revert.reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Raffle;
    use alloy_core::sol_types::SolError;

    #[test]
    fn test_downcast_through_context() {
        let err: anyhow::Error = DeployError::ConfigurationMissing {
            network: "chain 5".to_string(),
        }
        .into();
        let err = err.context("Failed to resolve network");

        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ConfigurationMissing { .. })
        ));
    }

    #[test]
    fn test_is_revert_of_matches_selector() {
        let data = Bytes::from(Raffle::Raffle__SendMoreToEnterRaffle {}.abi_encode());
        let err: anyhow::Error = DeployError::Reverted {
            to: Address::ZERO,
            data,
        }
        .into();

        assert!(is_revert_of::<Raffle::Raffle__SendMoreToEnterRaffle>(&err));
        assert!(!is_revert_of::<Raffle::Raffle__RaffleNotOpen>(&err));
        assert_eq!(revert_reason(&err), None);
    }

    #[test]
    fn test_revert_reason_of_require() {
        let data = Bytes::from(
            alloy_core::sol_types::Revert {
                reason: "nonexistent request".to_string(),
            }
            .abi_encode(),
        );
        let err = anyhow::Error::from(DeployError::Reverted {
            to: Address::ZERO,
            data,
        })
        .context("Failed to fulfill");

        assert_eq!(revert_reason(&err).as_deref(), Some("nonexistent request"));
    }
}

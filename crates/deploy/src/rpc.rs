//! Shared utilities for talking to Ethereum JSON-RPC endpoints.

use std::time::Duration;

use alloy_core::primitives::Bytes;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Error object returned by a JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    /// Revert payload, when the node reports one.
    pub data: Option<Bytes>,
}

impl RpcError {
    fn from_value(error: &Value) -> Self {
        let data = error.get("data").and_then(|data| match data {
            Value::String(hex) => hex.parse::<Bytes>().ok(),
            // Some nodes nest the payload as `{ "data": "0x..." }`.
            Value::Object(inner) => inner
                .get("data")
                .and_then(Value::as_str)
                .and_then(|hex| hex.parse::<Bytes>().ok()),
            _ => None,
        });

        Self {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            data,
        }
    }
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Errors returned by the endpoint are surfaced as [`RpcError`] so callers can
/// inspect the revert payload with `downcast_ref`.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        return Err(RpcError::from_value(error).into());
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Wait until `check_fn` returns `Ok(Some(_))`, polling every `poll_interval`.
///
/// `Ok(None)` means "not yet"; an `Err` is logged and retried since nodes
/// commonly fail transiently while a transaction is propagating.
pub async fn poll_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
    check_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let start = std::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                tracing::trace!(what = %name, "Not ready yet, retrying...");
            }
            Err(e) => {
                tracing::trace!(error = %e, what = %name, "Check failed, retrying...");
            }
        }

        if start.elapsed() > timeout {
            anyhow::bail!("Timeout waiting for {}", name);
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> anyhow::Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", value))
}

/// Format a quantity as a `0x`-prefixed hex string.
pub fn quantity(value: impl std::fmt::LowerHex) -> String {
    format!("0x{:x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_round_trip() {
        assert_eq!(quantity(0u64), "0x0");
        assert_eq!(quantity(31337u64), "0x7a69");
        assert_eq!(parse_quantity("0x7a69").unwrap(), 31337);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_rpc_error_with_revert_data() {
        let error = serde_json::json!({
            "code": 3,
            "message": "execution reverted",
            "data": "0x1e4ec46b"
        });

        let parsed = RpcError::from_value(&error);
        assert_eq!(parsed.code, 3);
        assert_eq!(parsed.data.unwrap().as_ref(), &[0x1e, 0x4e, 0xc4, 0x6b]);
    }

    #[test]
    fn test_rpc_error_with_nested_data() {
        let error = serde_json::json!({
            "code": -32603,
            "message": "Error: VM Exception",
            "data": { "message": "reverted", "data": "0xdeadbeef" }
        });

        let parsed = RpcError::from_value(&error);
        assert_eq!(parsed.data.unwrap().as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[tokio::test]
    async fn test_poll_until_returns_first_ready_value() {
        let counter = std::sync::atomic::AtomicU32::new(0);

        let value = poll_until(
            "counter",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { Ok((n >= 2).then_some(n)) }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
    }
}

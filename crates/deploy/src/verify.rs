//! Contract source verification on Etherscan-compatible explorers.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Etherscan API serving Sepolia.
pub const ETHERSCAN_SEPOLIA_API: &str = "https://api-sepolia.etherscan.io/api";

/// Compiler input and version recorded by the build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildInfo {
    pub solc_long_version: String,
    pub input: Value,
}

impl BuildInfo {
    /// Find the build info under `<artifacts>/build-info/` whose compiler input
    /// contains `source_path` (e.g. `contracts/Raffle.sol`).
    pub fn find(artifacts_root: &Path, source_path: &str) -> Result<Self> {
        let dir = artifacts_root.join("build-info");
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        candidates.sort();

        for path in candidates {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let json: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            if json["input"]["sources"].get(source_path).is_none() {
                continue;
            }

            let solc_long_version = json["solcLongVersion"]
                .as_str()
                .with_context(|| format!("{} has no solcLongVersion", path.display()))?
                .to_string();

            tracing::debug!(path = %path.display(), source_path, "Build info found");
            return Ok(Self {
                solc_long_version,
                input: json["input"].clone(),
            });
        }

        anyhow::bail!("No build info in {} compiles {}", dir.display(), source_path)
    }

    /// Version string as the explorer expects it (`v0.8.7+commit.e28d00a7`).
    pub fn compiler_version(&self) -> String {
        let version = self.solc_long_version.trim();
        if version.starts_with('v') {
            version.to_string()
        } else {
            format!("v{}", version)
        }
    }
}

/// What to verify.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub address: Address,
    /// Fully qualified name, `contracts/Raffle.sol:Raffle`.
    pub contract_name: String,
    pub build_info: BuildInfo,
    /// ABI-encoded constructor arguments.
    pub constructor_args: Bytes,
}

/// Successful verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
}

#[derive(Debug, Deserialize)]
struct ExplorerReply {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

impl ExplorerReply {
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "1"
    }
}

fn is_already_verified(text: &str) -> bool {
    text.to_lowercase().contains("already verified")
}

/// The explorer has not processed the submission yet.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("verification pending: {reason}")]
struct StillPending {
    reason: String,
}

/// Submission response: a job to poll, or nothing to do.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Submission {
    Guid(String),
    AlreadyVerified,
}

fn interpret_submission(reply: &ExplorerReply) -> Result<Submission> {
    let text = reply.result_text();
    if reply.is_ok() {
        return Ok(Submission::Guid(text));
    }
    if is_already_verified(&text) {
        return Ok(Submission::AlreadyVerified);
    }
    anyhow::bail!("Verification submission rejected: {} ({})", text, reply.message)
}

fn interpret_status(reply: &ExplorerReply) -> Result<VerificationOutcome> {
    let text = reply.result_text();
    if is_already_verified(&text) {
        return Ok(VerificationOutcome::AlreadyVerified);
    }
    if reply.is_ok() {
        return Ok(VerificationOutcome::Verified);
    }
    if text.to_lowercase().contains("pending") {
        return Err(StillPending { reason: text }.into());
    }
    anyhow::bail!("Verification failed: {}", text)
}

/// Client of the explorer verification API.
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    backoff: ExponentialBuilder,
}

impl EtherscanVerifier {
    pub fn new(api_url: Url, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: crate::rpc::create_client()?,
            api_url,
            api_key: api_key.into(),
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(3))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(10),
        })
    }

    /// Override the status polling schedule.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Submit `request` and poll until the explorer reaches a verdict.
    pub async fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome> {
        tracing::info!(
            address = %request.address,
            contract = %request.contract_name,
            "Verifying contract..."
        );

        let guid = match self.submit(request).await? {
            Submission::Guid(guid) => guid,
            Submission::AlreadyVerified => {
                tracing::info!(address = %request.address, "Contract already verified");
                return Ok(VerificationOutcome::AlreadyVerified);
            }
        };

        let outcome = (|| self.check_status(&guid))
            .retry(self.backoff.clone())
            .when(|e: &anyhow::Error| e.is::<StillPending>())
            .notify(|e: &anyhow::Error, after: Duration| {
                tracing::debug!(%guid, err = %e, ?after, "Verification not done yet");
            })
            .await?;

        tracing::info!(address = %request.address, %outcome, "Verification finished");
        Ok(outcome)
    }

    async fn submit(&self, request: &VerificationRequest) -> Result<Submission> {
        let source = serde_json::to_string(&request.build_info.input)
            .context("Failed to serialize compiler input")?;
        let address = request.address.to_string();
        let compiler_version = request.build_info.compiler_version();
        let constructor_args = hex::encode(&request.constructor_args);

        let form = [
            ("apikey", self.api_key.as_str()),
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source.as_str()),
            ("codeformat", "solidity-standard-json-input"),
            ("contractname", request.contract_name.as_str()),
            ("compilerversion", compiler_version.as_str()),
            // Misspelled on the explorer side.
            ("constructorArguements", constructor_args.as_str()),
        ];

        let reply: ExplorerReply = self
            .client
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .await
            .context("Failed to reach the explorer API")?
            .json()
            .await
            .context("Failed to parse the explorer response")?;

        interpret_submission(&reply)
    }

    async fn check_status(&self, guid: &str) -> Result<VerificationOutcome> {
        let reply: ExplorerReply = self
            .client
            .get(self.api_url.clone())
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .context("Failed to reach the explorer API")?
            .json()
            .await
            .context("Failed to parse the explorer response")?;

        interpret_status(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn reply(status: &str, result: &str) -> ExplorerReply {
        ExplorerReply {
            status: status.to_string(),
            message: String::new(),
            result: Value::String(result.to_string()),
        }
    }

    #[test]
    fn test_submission_replies() {
        assert_eq!(
            interpret_submission(&reply("1", "abc123")).unwrap(),
            Submission::Guid("abc123".to_string())
        );
        assert_eq!(
            interpret_submission(&reply("0", "Contract source code already verified")).unwrap(),
            Submission::AlreadyVerified
        );
        assert!(interpret_submission(&reply("0", "Invalid API Key")).is_err());
    }

    #[test]
    fn test_status_replies() {
        assert_eq!(
            interpret_status(&reply("1", "Pass - Verified")).unwrap(),
            VerificationOutcome::Verified
        );
        assert_eq!(
            interpret_status(&reply("0", "Already Verified")).unwrap(),
            VerificationOutcome::AlreadyVerified
        );

        let pending = interpret_status(&reply("0", "Pending in queue")).unwrap_err();
        assert!(pending.is::<StillPending>());

        let failed = interpret_status(&reply("0", "Fail - Unable to verify")).unwrap_err();
        assert!(!failed.is::<StillPending>());
    }

    #[test]
    fn test_compiler_version_prefix() {
        let info = BuildInfo {
            solc_long_version: "0.8.7+commit.e28d00a7".to_string(),
            input: Value::Null,
        };
        assert_eq!(info.compiler_version(), "v0.8.7+commit.e28d00a7");
    }

    #[test]
    fn test_find_build_info() {
        let tmp = TempDir::new("artifacts").unwrap();
        let dir = tmp.path().join("build-info");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("a.json"),
            r#"{"solcLongVersion":"0.8.7+commit.e28d00a7","input":{"language":"Solidity","sources":{"contracts/test/VRFCoordinatorV2Mock.sol":{}}}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("b.json"),
            r#"{"solcLongVersion":"0.8.7+commit.e28d00a7","input":{"language":"Solidity","sources":{"contracts/Raffle.sol":{"content":"contract Raffle {}"}}}}"#,
        )
        .unwrap();

        let info = BuildInfo::find(tmp.path(), "contracts/Raffle.sol").unwrap();

        assert_eq!(info.input["sources"]["contracts/Raffle.sol"]["content"], "contract Raffle {}");
        assert!(BuildInfo::find(tmp.path(), "contracts/Lottery.sol").is_err());
    }
}

//! Etherscan-compatible explorer API client.

use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{VerificationRequest, VerificationService};

/// Default timeout for explorer requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Status string returned while a verification job is queued.
const PENDING_STATUS: &str = "Pending in queue";

/// Connection settings for an Etherscan-compatible explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtherscanConfig {
    /// API endpoint, e.g. `https://api.etherscan.io/v2/api`.
    pub api_url: Url,
    pub api_key: String,
    /// Sent as `chainid` for multichain endpoints.
    pub chain_id: Option<u64>,
    /// How many times a queued verification is polled before giving up.
    pub status_poll_attempts: usize,
}

/// Generic explorer API envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    result: Value,
}

impl ApiResponse {
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum StatusError {
    #[error("verification still pending")]
    Pending,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// [`VerificationService`] speaking the Etherscan contract API.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    config: EtherscanConfig,
}

impl EtherscanClient {
    pub fn new(config: EtherscanConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn base_params(&self, module: &'static str, action: &'static str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("apikey", self.config.api_key.clone()),
            ("module", module.to_string()),
            ("action", action.to_string()),
        ];
        if let Some(chain_id) = self.config.chain_id {
            params.push(("chainid", chain_id.to_string()));
        }
        params
    }

    async fn check_status(&self, guid: &str) -> Result<(), StatusError> {
        let mut params = self.base_params("contract", "checkverifystatus");
        params.push(("guid", guid.to_string()));

        let response: ApiResponse = self
            .client
            .get(self.config.api_url.clone())
            .query(&params)
            .send()
            .await
            .context("Failed to query verification status")?
            .json()
            .await
            .context("Failed to parse verification status response")?;

        let result = response.result_text();
        if result == PENDING_STATUS {
            return Err(StatusError::Pending);
        }

        if response.status.as_deref() == Some("1") {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Verification rejected: {}", result).into())
        }
    }
}

impl VerificationService for EtherscanClient {
    async fn submit(&self, request: &VerificationRequest) -> Result<()> {
        let build_info = request
            .build_info
            .as_ref()
            .context("Compiler build info is required for standard JSON verification")?;

        let mut params = self.base_params("contract", "verifysourcecode");
        params.extend([
            ("contractaddress", request.address.to_string()),
            (
                "sourceCode",
                serde_json::to_string(&build_info.input)
                    .context("Failed to serialize compiler input")?,
            ),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", request.contract.clone()),
            ("compilerversion", format!("v{}", build_info.solc_long_version)),
            // Misspelling is part of the API.
            ("constructorArguements", hex::encode(&request.constructor_args)),
        ]);

        let response: ApiResponse = self
            .client
            .post(self.config.api_url.clone())
            .form(&params)
            .send()
            .await
            .context("Failed to submit verification request")?
            .json()
            .await
            .context("Failed to parse verification response")?;

        if response.status.as_deref() != Some("1") {
            anyhow::bail!(
                "Verification submission rejected ({}): {}",
                response.message.as_deref().unwrap_or("no message"),
                response.result_text()
            );
        }

        let guid = response.result_text();
        tracing::debug!(guid = %guid, address = %request.address, "Verification submitted");

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(3))
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(self.config.status_poll_attempts);

        (|| self.check_status(&guid))
            .retry(backoff)
            .when(|err| matches!(err, StatusError::Pending))
            .notify(|_, after: Duration| {
                tracing::debug!(guid = %guid, retry_in = ?after, "Verification pending...");
            })
            .await
            .map_err(anyhow::Error::from)
    }

    async fn is_indexed(&self, address: Address) -> Result<bool> {
        let mut params = self.base_params("proxy", "eth_getCode");
        params.push(("address", address.to_string()));
        params.push(("tag", "latest".to_string()));

        let response: ApiResponse = self
            .client
            .get(self.config.api_url.clone())
            .query(&params)
            .send()
            .await
            .context("Failed to query explorer")?
            .json()
            .await
            .context("Failed to parse explorer response")?;

        Ok(is_deployed_code(&response.result))
    }
}

/// `eth_getCode` returns `0x` for addresses without code.
fn is_deployed_code(result: &Value) -> bool {
    result
        .as_str()
        .is_some_and(|code| code.starts_with("0x") && code.len() > 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_deployed_code() {
        assert!(is_deployed_code(&Value::String("0x6080".to_string())));
        assert!(!is_deployed_code(&Value::String("0x".to_string())));
        assert!(!is_deployed_code(&Value::String(
            "Invalid API Key".to_string()
        )));
        assert!(!is_deployed_code(&Value::Null));
    }

    #[test]
    fn test_response_text() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"status":"0","message":"NOTOK","result":"Contract source code already verified"}"#,
        )
        .unwrap();
        assert_eq!(response.result_text(), "Contract source code already verified");
        assert_eq!(response.status.as_deref(), Some("0"));

        // Proxy module responses are JSON-RPC shaped, without status.
        let response: ApiResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x6080"}"#).unwrap();
        assert!(response.status.is_none());
        assert!(is_deployed_code(&response.result));
    }

    #[test]
    fn test_base_params_include_chain_id() {
        let client = EtherscanClient::new(EtherscanConfig {
            api_url: Url::parse("https://api.etherscan.io/v2/api").unwrap(),
            api_key: "key".to_string(),
            chain_id: Some(56),
            status_poll_attempts: 5,
        })
        .unwrap();

        let params = client.base_params("contract", "checkverifystatus");
        assert!(params.contains(&("chainid", "56".to_string())));
        assert!(params.contains(&("action", "checkverifystatus".to_string())));
    }

    #[tokio::test]
    async fn test_submit_requires_build_info() {
        let client = EtherscanClient::new(EtherscanConfig {
            api_url: Url::parse("http://127.0.0.1:9/api").unwrap(),
            api_key: "key".to_string(),
            chain_id: None,
            status_poll_attempts: 1,
        })
        .unwrap();

        let err = client
            .submit(&VerificationRequest {
                address: Address::ZERO,
                contract: "contracts/Merchant.sol:Merchant".to_string(),
                constructor_args: Default::default(),
                build_info: None,
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("build info"));
    }
}

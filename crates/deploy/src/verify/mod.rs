//! Best-effort source verification.
//!
//! Verification only makes deployed bytecode attributable on the explorer; the
//! contracts work without it. Every failure therefore ends up as a
//! [`VerificationOutcome::Failed`] value and never as an error.

mod etherscan;

use std::future::Future;

use alloy_core::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

pub use etherscan::{EtherscanClient, EtherscanConfig};

use crate::contracts::{BuildInfo, ContractArtifact};

/// Everything an explorer needs to match source to deployed bytecode.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub address: Address,
    /// `<source>:<contract>`.
    pub contract: String,
    pub constructor_args: Bytes,
    /// Compiler version and standard JSON input, when the build info is available.
    pub build_info: Option<BuildInfo>,
}

/// External source verification service.
pub trait VerificationService: Send + Sync {
    /// Submit `request` and wait for the service's verdict.
    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Whether the service already sees contract code at `address`.
    fn is_indexed(&self, address: Address) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// Result of a verification attempt; both variants let the run continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum VerificationOutcome {
    Verified,
    Failed(String),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }
}

/// Submits contracts to a [`VerificationService`], if one is configured.
#[derive(Debug, Clone)]
pub struct Verifier<V> {
    service: Option<V>,
}

impl<V: VerificationService> Verifier<V> {
    pub fn new(service: V) -> Self {
        Self {
            service: Some(service),
        }
    }

    /// A verifier without a backing service; every attempt fails softly.
    pub fn disabled() -> Self {
        Self { service: None }
    }

    pub fn service(&self) -> Option<&V> {
        self.service.as_ref()
    }

    /// Try to verify `artifact` deployed at `address`. Never retries.
    pub async fn verify(
        &self,
        stage: &str,
        address: Address,
        artifact: &ContractArtifact,
        constructor_args: &Bytes,
    ) -> VerificationOutcome {
        let Some(service) = &self.service else {
            tracing::warn!(
                stage,
                address = %address,
                "Verification skipped: no verification service configured"
            );
            return VerificationOutcome::Failed("no verification service configured".to_string());
        };

        // Missing build info is reported by the service; some explorers only
        // need the address.
        let build_info = match artifact.load_build_info() {
            Ok(build_info) => Some(build_info),
            Err(err) => {
                tracing::debug!(stage, error = %err, "Build info unavailable");
                None
            }
        };

        let request = VerificationRequest {
            address,
            contract: artifact.fully_qualified_name(),
            constructor_args: constructor_args.clone(),
            build_info,
        };

        tracing::info!(stage, address = %address, contract = %request.contract, "Verifying contract...");

        match service.submit(&request).await {
            Ok(()) => {
                tracing::info!(stage, address = %address, "Contract verified");
                VerificationOutcome::Verified
            }
            Err(err) => {
                tracing::warn!(
                    stage,
                    address = %address,
                    error = ?err,
                    "Contract verification failed, continuing"
                );
                VerificationOutcome::Failed(format!("{:#}", err))
            }
        }
    }
}

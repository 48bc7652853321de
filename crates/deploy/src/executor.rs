//! Single-transaction stages.

use alloy_core::primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, Serialize};

use crate::{
    AddressRegistry, DeployError,
    chain::{Chain, TxReceipt, TxRequest},
    contracts::{Artifacts, ContractName, UpgradeableProxy, proxy_constructor_args},
    registry::Role,
    verify::VerificationOutcome,
};

/// A contract to create, under the role it will be recorded as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifactReference {
    pub role: Role,
    pub contract: ContractName,
    /// ABI-encoded constructor arguments, empty for parameterless constructors.
    pub constructor_args: Bytes,
}

impl ContractArtifactReference {
    pub fn new(role: Role, contract: ContractName) -> Self {
        Self {
            role,
            contract,
            constructor_args: Bytes::new(),
        }
    }

    pub fn with_constructor_args(mut self, args: Bytes) -> Self {
        self.constructor_args = args;
        self
    }
}

/// Confirmation state of a deployed contract.
///
/// `Pending -> Mined -> (Verified | VerificationFailed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationState {
    Pending,
    Mined,
    Verified,
    VerificationFailed,
}

/// A contract created by this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub role: Role,
    pub contract: ContractName,
    pub address: Address,
    pub tx_hash: TxHash,
    pub state: ConfirmationState,
}

impl DeployedContract {
    /// Move a mined contract to its verification state.
    pub fn apply_verification(&mut self, outcome: &VerificationOutcome) {
        if self.state != ConfirmationState::Mined {
            return;
        }
        self.state = match outcome {
            VerificationOutcome::Verified => ConfirmationState::Verified,
            VerificationOutcome::Failed(_) => ConfirmationState::VerificationFailed,
        };
    }
}

/// A proxy to deploy in front of an already recorded implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    /// Role the proxy address is recorded under.
    pub role: Role,
    /// Role of the implementation; must be resolved before the proxy stage.
    pub implementation: Role,
    /// Initializer calldata executed by the proxy constructor.
    pub initializer: Bytes,
}

/// A deployed proxy and the implementation it delegates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDeployment {
    pub role: Role,
    pub proxy_address: Address,
    pub implementation_address: Address,
    pub initializer_args: Bytes,
    pub tx_hash: TxHash,
}

/// A mined call transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTx {
    pub label: String,
    pub to: Address,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Submits one transaction per stage and blocks until it is mined.
///
/// Every failure is fatal and nothing is retried: once a transaction has been
/// broadcast, retrying could create a second contract or a duplicate entry.
pub struct StageExecutor<C> {
    chain: C,
    artifacts: Artifacts,
}

impl<C: Chain> StageExecutor<C> {
    pub fn new(chain: C, artifacts: Artifacts) -> Self {
        Self { chain, artifacts }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Create a contract and record its address under `reference.role`.
    pub async fn deploy(
        &self,
        registry: &mut AddressRegistry,
        reference: ContractArtifactReference,
    ) -> Result<DeployedContract, DeployError> {
        let stage = format!("deploy {}", reference.role);

        // Refuse before spending gas on a contract we could not record.
        if registry.contains(reference.role) {
            return Err(DeployError::DuplicateRole {
                role: reference.role,
            });
        }

        let artifact = self.artifacts.artifact(reference.contract)?;
        let mut code = artifact.bytecode.to_vec();
        code.extend_from_slice(&reference.constructor_args);

        tracing::info!(
            role = %reference.role,
            contract = %reference.contract,
            "Deploying contract..."
        );

        let receipt = self.execute(&stage, TxRequest::create(code)).await?;
        let address = receipt
            .contract_address
            .ok_or(DeployError::MissingContractAddress {
                stage: stage.clone(),
                tx_hash: receipt.tx_hash,
            })?;

        registry.record(reference.role, address)?;

        tracing::info!(
            role = %reference.role,
            contract = %reference.contract,
            address = %address,
            tx_hash = %receipt.tx_hash,
            "Contract deployed"
        );

        Ok(DeployedContract {
            role: reference.role,
            contract: reference.contract,
            address,
            tx_hash: receipt.tx_hash,
            state: ConfirmationState::Mined,
        })
    }

    /// Deploy an ERC-1967 proxy in front of the implementation recorded under
    /// `request.implementation`, running `request.initializer` in its constructor.
    pub async fn deploy_proxy(
        &self,
        registry: &mut AddressRegistry,
        request: ProxyRequest,
    ) -> Result<ProxyDeployment, DeployError> {
        let implementation = registry.resolve(request.implementation)?;
        let constructor_args = proxy_constructor_args(implementation, &request.initializer);

        let proxy = self
            .deploy(
                registry,
                ContractArtifactReference::new(request.role, ContractName::Erc1967Proxy)
                    .with_constructor_args(constructor_args),
            )
            .await?;

        tracing::info!(
            role = %request.role,
            proxy = %proxy.address,
            implementation = %implementation,
            "Proxy deployed"
        );

        Ok(ProxyDeployment {
            role: request.role,
            proxy_address: proxy.address,
            implementation_address: implementation,
            initializer_args: request.initializer,
            tx_hash: proxy.tx_hash,
        })
    }

    /// Send a call transaction and block until it is mined.
    pub async fn call(&self, label: &str, tx: TxRequest) -> Result<SubmittedTx, DeployError> {
        let to = tx.to.unwrap_or_default();
        let receipt = self.execute(label, tx).await?;

        tracing::info!(
            stage = label,
            to = %to,
            tx_hash = %receipt.tx_hash,
            "Transaction mined"
        );

        Ok(SubmittedTx {
            label: label.to_string(),
            to,
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        })
    }

    /// Broadcast without waiting.
    pub async fn submit(&self, stage: &str, tx: TxRequest) -> Result<TxHash, DeployError> {
        let tx_hash = self
            .chain
            .submit(tx)
            .await
            .map_err(|e| DeployError::transaction(stage, e))?;

        tracing::debug!(stage, tx_hash = %tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    /// Block until `tx_hash` is mined; a reverted receipt is an error.
    pub async fn confirm(&self, stage: &str, tx_hash: TxHash) -> Result<TxReceipt, DeployError> {
        let receipt = self
            .chain
            .wait_for_receipt(tx_hash)
            .await
            .map_err(|e| DeployError::transaction(stage, e))?;

        if !receipt.success {
            return Err(DeployError::Reverted {
                stage: stage.to_string(),
                tx_hash,
            });
        }

        Ok(receipt)
    }

    /// Implementation behind an ERC-1967 proxy.
    pub async fn implementation_of(
        &self,
        stage: &str,
        proxy: Address,
    ) -> Result<Address, DeployError> {
        UpgradeableProxy::at(proxy)
            .implementation(&self.chain)
            .await
            .map_err(|e| DeployError::transaction(stage, e))
    }

    async fn execute(&self, stage: &str, tx: TxRequest) -> Result<TxReceipt, DeployError> {
        let tx_hash = self.submit(stage, tx).await?;
        tracing::info!(stage, tx_hash = %tx_hash, "Waiting for transaction to be mined...");
        self.confirm(stage, tx_hash).await
    }
}

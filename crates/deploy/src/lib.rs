//! slashkit-deploy - Rollout engine for upgradeable contract factories.
//!
//! This crate deploys contract templates and their ERC-1967 factory proxies on an
//! EVM chain, verifies them on an explorer, and configures the deployed factories
//! through sequential transactions.

pub mod chain;
pub mod config;
pub mod confirm;
pub mod contracts;
mod error;
pub mod executor;
pub mod planner;
pub mod registry;
pub mod report;
pub mod sequencer;
pub mod verify;

pub use chain::{Chain, RpcChain, SimulatedChain};
pub use config::{CONFIG_FILENAME, ExplorerConfig, RolloutConfig};
pub use confirm::{ConfirmationConfig, ConfirmationWaiter, WaitPolicy};
pub use contracts::{Artifacts, ContractName};
pub use error::{BoxError, DeployError};
pub use executor::{
    ConfirmationState, ContractArtifactReference, DeployedContract, ProxyDeployment, ProxyRequest,
    StageExecutor, SubmittedTx,
};
pub use planner::{
    DeploymentPlan, DeploymentPlanner, FamilyPlan, MerchantClone, RunFailure, Stage, StageFlags,
};
pub use registry::{AddressRegistry, Binding, Family, Role, RoleKind};
pub use report::RunReport;
pub use sequencer::{
    AprTier, EntryState, InitializationReport, InitializationSequencer, InitializationTarget,
    SubscriptionConfig, SubscriptionPlan, parse_price,
};
pub use verify::{
    EtherscanClient, EtherscanConfig, VerificationOutcome, VerificationService, Verifier,
};

//! Fatal error classes of a rollout run.

use alloy_core::primitives::TxHash;

use crate::registry::Role;

/// Boxed collaborator error (RPC transport, HTTP, file system).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A fatal orchestration error.
///
/// Any of these aborts the remaining stages of the run. Verification problems are
/// never represented here, see [`crate::VerificationOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A role was bound twice in the same run. This is a planning bug.
    #[error("role {role} is already bound in this run")]
    DuplicateRole { role: Role },

    /// A stage needed a role that was neither deployed nor attached.
    #[error("role {role} is not resolved; deploy it or attach it by address")]
    UnresolvedDependency { role: Role },

    /// Submitting a transaction or waiting for its receipt failed.
    #[error("stage {stage}: transaction failed")]
    Transaction {
        stage: String,
        #[source]
        source: BoxError,
    },

    /// The transaction was mined but reverted.
    #[error("stage {stage}: transaction {tx_hash} reverted")]
    Reverted { stage: String, tx_hash: TxHash },

    /// A creation transaction was mined without producing a contract address.
    #[error("stage {stage}: creation transaction {tx_hash} has no contract address")]
    MissingContractAddress { stage: String, tx_hash: TxHash },

    /// Contract bytecode or metadata could not be resolved.
    #[error("artifact for {contract} unavailable")]
    Artifact {
        contract: String,
        #[source]
        source: BoxError,
    },

    /// The plan asks for something the families cannot do.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The operator interrupted a confirmation wait.
    #[error("stage {stage}: cancelled while waiting for confirmation")]
    Cancelled { stage: String },
}

impl DeployError {
    pub(crate) fn transaction(stage: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Transaction {
            stage: stage.into(),
            source: source.into(),
        }
    }
}

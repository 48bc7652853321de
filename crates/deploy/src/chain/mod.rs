//! Chain access used by the orchestrator.
//!
//! The orchestrator only needs a handful of operations from an EVM node: submit a
//! signed transaction from the run's signing account, wait for its receipt, and read
//! code and storage. [`RpcChain`] provides them over JSON-RPC, [`SimulatedChain`]
//! in memory for dry runs.

mod rpc;
mod simulated;

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, TxHash};
use anyhow::Result;

pub use rpc::RpcChain;
pub use simulated::{SIMULATED_CHAIN_ID, SimulatedChain, SimulatedTx};

/// An unsigned transaction from the signing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// Target contract, `None` for a contract creation.
    pub to: Option<Address>,
    /// Calldata, or creation code followed by the constructor arguments.
    pub input: Bytes,
}

impl TxRequest {
    /// A contract creation transaction.
    pub fn create(code: impl Into<Bytes>) -> Self {
        Self {
            to: None,
            input: code.into(),
        }
    }

    /// A call to an existing contract.
    pub fn call(to: Address, input: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            input: input.into(),
        }
    }

    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// The parts of a mined receipt the orchestrator looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    /// `false` when the transaction reverted.
    pub success: bool,
    /// Set for successful creation transactions.
    pub contract_address: Option<Address>,
}

/// Capability to interact with the target chain from a single signing account.
///
/// Implementations must not reorder submissions: the orchestrator relies on
/// program order to keep the account nonce consistent.
pub trait Chain: Send + Sync {
    /// The account every transaction is sent from.
    fn signer_address(&self) -> Address;

    /// Chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Sign and broadcast a transaction, returning its hash.
    fn submit(&self, tx: TxRequest) -> impl Future<Output = Result<TxHash>> + Send;

    /// Block until `tx_hash` is mined. There is no timeout.
    fn wait_for_receipt(&self, tx_hash: TxHash) -> impl Future<Output = Result<TxReceipt>> + Send;

    /// Deployed code at `address`, empty if none.
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    /// Raw storage word at `slot`.
    fn storage_at(&self, address: Address, slot: B256) -> impl Future<Output = Result<B256>> + Send;
}

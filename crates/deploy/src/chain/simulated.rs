//! In-memory chain for dry runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_core::primitives::{Address, B256, Bytes, TxHash, keccak256};
use anyhow::Result;

use super::{Chain, TxReceipt, TxRequest};

/// Chain id reported by a [`SimulatedChain`] unless overridden.
pub const SIMULATED_CHAIN_ID: u64 = 31337;

/// A transaction accepted by a [`SimulatedChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTx {
    /// Position in submission order, which is also the sender nonce.
    pub nonce: u64,
    pub tx_hash: TxHash,
    pub request: TxRequest,
    /// Address of the created contract, for creations.
    pub created: Option<Address>,
}

#[derive(Debug, Default)]
struct State {
    txs: Vec<SimulatedTx>,
    receipts: HashMap<TxHash, TxReceipt>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, B256), B256>,
    reject_at: Option<u64>,
    revert_at: Option<u64>,
}

/// Chain that mines every transaction instantly in memory.
///
/// Creation addresses follow the CREATE rule from the signer and nonce, so a dry
/// run shows the addresses a fresh account would produce. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    signer: Address,
    chain_id: u64,
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(Address::repeat_byte(0x5a))
    }
}

impl SimulatedChain {
    pub fn new(signer: Address) -> Self {
        Self {
            signer,
            chain_id: SIMULATED_CHAIN_ID,
            state: Arc::default(),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Make the submission with nonce `nonce` fail before it is broadcast.
    pub fn reject_submission_at(&self, nonce: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_at = Some(nonce);
        }
    }

    /// Make the transaction with nonce `nonce` mine as reverted.
    pub fn revert_at(&self, nonce: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.revert_at = Some(nonce);
        }
    }

    /// Preload contract code, e.g. for contracts attached by address.
    pub fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        if let Ok(mut state) = self.state.lock() {
            state.code.insert(address, code.into());
        }
    }

    pub fn set_storage(&self, address: Address, slot: B256, value: B256) {
        if let Ok(mut state) = self.state.lock() {
            state.storage.insert((address, slot), value);
        }
    }

    /// Every accepted transaction, in submission order.
    pub fn transactions(&self) -> Vec<SimulatedTx> {
        self.state
            .lock()
            .map(|state| state.txs.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("Simulated chain state poisoned"))
    }
}

impl Chain for SimulatedChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn submit(&self, tx: TxRequest) -> Result<TxHash> {
        let mut state = self.lock()?;
        let nonce = state.txs.len() as u64;

        if state.reject_at == Some(nonce) {
            anyhow::bail!("Simulated submission failure at nonce {}", nonce);
        }

        let mut preimage = nonce.to_be_bytes().to_vec();
        preimage.extend_from_slice(&tx.input);
        let tx_hash = keccak256(&preimage);

        let success = state.revert_at != Some(nonce);
        let created = (tx.is_creation() && success).then(|| self.signer.create(nonce));

        if let Some(address) = created {
            state.code.insert(address, tx.input.clone());
        }

        state.receipts.insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                block_number: Some(nonce + 1),
                success,
                contract_address: created,
            },
        );
        state.txs.push(SimulatedTx {
            nonce,
            tx_hash,
            request: tx,
            created,
        });

        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        self.lock()?
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown transaction {}", tx_hash))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        Ok(self.lock()?.code.get(&address).cloned().unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        Ok(self
            .lock()?
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }
}

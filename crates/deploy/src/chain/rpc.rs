//! JSON-RPC chain client with a local signing key.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use url::Url;

use super::{Chain, TxReceipt, TxRequest};

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// [`Chain`] backed by an HTTP JSON-RPC endpoint.
///
/// Nonce, gas and chain id are filled by the provider; the signing key never
/// leaves this process.
#[derive(Clone)]
pub struct RpcChain {
    provider: DynProvider,
    signer: Address,
    poll_interval: Duration,
}

impl RpcChain {
    /// Connect to `rpc_url`, signing with the hex-encoded `private_key`.
    pub fn connect(rpc_url: Url, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("Failed to parse signing key")?;
        let address = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url)
            .erased();

        Ok(Self {
            provider,
            signer: address,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the receipt polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Chain for RpcChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to query chain id")
    }

    async fn submit(&self, tx: TxRequest) -> Result<TxHash> {
        let request = match tx.to {
            Some(to) => TransactionRequest::default()
                .with_from(self.signer)
                .with_to(to)
                .with_input(tx.input),
            None => TransactionRequest::default()
                .with_from(self.signer)
                .with_deploy_code(tx.input),
        };

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .context("Failed to send transaction")?;

        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .with_context(|| format!("Failed to fetch receipt for {}", tx_hash))?;

            if let Some(receipt) = receipt {
                return Ok(TxReceipt {
                    tx_hash,
                    block_number: receipt.block_number,
                    success: receipt.status(),
                    contract_address: receipt.contract_address,
                });
            }

            tracing::trace!(tx_hash = %tx_hash, "Transaction not mined yet, polling again...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.provider
            .get_code_at(address)
            .await
            .with_context(|| format!("Failed to fetch code at {}", address))
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        let value = self
            .provider
            .get_storage_at(address, U256::from_be_bytes(slot.0))
            .await
            .with_context(|| format!("Failed to read storage of {}", address))?;

        Ok(B256::from(value))
    }
}

//! Contract bindings.
//!
//! Each deployable contract is a [`ContractName`] variant; its creation code comes
//! from the compiled [`Artifacts`] and the functions the orchestrator calls are
//! declared statically with `sol!`, so no function is ever looked up by name at
//! runtime.

mod artifacts;

use alloy_core::primitives::{Address, B256, Bytes, U256, b256};
use alloy_sol_types::{SolCall, SolValue, sol};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use artifacts::{Artifacts, BuildInfo, ContractArtifact};

use crate::chain::{Chain, TxRequest};

sol! {
    interface IStakingFactory {
        function initialize(address feeAddress, address stakingTemplate) external;
        function addSubscription(string name, uint256 period, uint256 price) external;
        function addApr(uint256 apr) external;
    }

    interface ISlashFactory {
        function initialize(address owner, address merchantTemplate, address defaultController) external;
        function deployMerchant(address merchantWallet, address receiveToken, address[] reserved) external;
    }

    interface IUUPSUpgradeable {
        function upgradeTo(address newImplementation) external;
    }
}

/// ERC-1967 implementation slot: `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`.
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// Contracts the orchestrator knows how to deploy.
///
/// The string form is the compiled artifact name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum ContractName {
    Merchant,
    SlashFactory,
    #[strum(serialize = "SingleNFTStaking")]
    #[serde(rename = "SingleNFTStaking")]
    SingleNftStaking,
    #[strum(serialize = "SingleNFTStakingFactory")]
    #[serde(rename = "SingleNFTStakingFactory")]
    SingleNftStakingFactory,
    #[strum(serialize = "MultiNFTStaking")]
    #[serde(rename = "MultiNFTStaking")]
    MultiNftStaking,
    #[strum(serialize = "MultiNFTStakingFactory")]
    #[serde(rename = "MultiNFTStakingFactory")]
    MultiNftStakingFactory,
    #[strum(serialize = "ERC1967Proxy")]
    #[serde(rename = "ERC1967Proxy")]
    Erc1967Proxy,
}

/// Arguments of a factory's `initialize` call, passed through the proxy constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryInitializer {
    /// `SlashFactory.initialize(owner, merchantTemplate, defaultController)`.
    Marketplace {
        owner: Address,
        default_controller: Address,
    },
    /// `*NFTStakingFactory.initialize(feeAddress, stakingTemplate)`.
    Staking { fee_recipient: Address },
}

impl FactoryInitializer {
    /// Encode the initializer call for a factory cloning `template`.
    pub fn calldata(&self, template: Address) -> Bytes {
        match *self {
            FactoryInitializer::Marketplace {
                owner,
                default_controller,
            } => ISlashFactory::initializeCall {
                owner,
                merchantTemplate: template,
                defaultController: default_controller,
            }
            .abi_encode()
            .into(),
            FactoryInitializer::Staking { fee_recipient } => IStakingFactory::initializeCall {
                feeAddress: fee_recipient,
                stakingTemplate: template,
            }
            .abi_encode()
            .into(),
        }
    }
}

/// Constructor arguments of `ERC1967Proxy(address logic, bytes data)`.
pub fn proxy_constructor_args(implementation: Address, initializer: &Bytes) -> Bytes {
    (implementation, initializer.clone())
        .abi_encode_params()
        .into()
}

/// Calls on a deployed staking factory.
#[derive(Debug, Clone, Copy)]
pub struct StakingFactory {
    pub address: Address,
}

impl StakingFactory {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    pub fn add_subscription(&self, name: &str, period: u64, price: U256) -> TxRequest {
        let call = IStakingFactory::addSubscriptionCall {
            name: name.to_string(),
            period: U256::from(period),
            price,
        };
        TxRequest::call(self.address, call.abi_encode())
    }

    pub fn add_apr(&self, apr: u64) -> TxRequest {
        let call = IStakingFactory::addAprCall {
            apr: U256::from(apr),
        };
        TxRequest::call(self.address, call.abi_encode())
    }
}

/// Calls on a deployed marketplace factory.
#[derive(Debug, Clone, Copy)]
pub struct SlashFactory {
    pub address: Address,
}

impl SlashFactory {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    /// Clone a merchant contract from the factory's template.
    pub fn deploy_merchant(
        &self,
        merchant_wallet: Address,
        receive_token: Address,
        reserved: Vec<Address>,
    ) -> TxRequest {
        let call = ISlashFactory::deployMerchantCall {
            merchantWallet: merchant_wallet,
            receiveToken: receive_token,
            reserved,
        };
        TxRequest::call(self.address, call.abi_encode())
    }
}

/// An ERC-1967 (UUPS) proxy.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeableProxy {
    pub address: Address,
}

impl UpgradeableProxy {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    pub fn upgrade_to(&self, new_implementation: Address) -> TxRequest {
        let call = IUUPSUpgradeable::upgradeToCall {
            newImplementation: new_implementation,
        };
        TxRequest::call(self.address, call.abi_encode())
    }

    /// Read the implementation address from the ERC-1967 slot.
    pub async fn implementation<C: Chain>(&self, chain: &C) -> Result<Address> {
        let word = chain.storage_at(self.address, IMPLEMENTATION_SLOT).await?;
        let implementation = Address::from_word(word);

        if implementation.is_zero() {
            anyhow::bail!("No implementation set behind proxy {}", self.address);
        }

        Ok(implementation)
    }
}

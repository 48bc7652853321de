//! Role to address bindings resolved during a run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::DeployError;
use crate::contracts::ContractName;

/// A family of contracts deployed together: one template and one upgradeable
/// factory that creates instances of it.
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
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    /// Merchant template + SlashFactory.
    Marketplace,
    /// SingleNFTStaking template + SingleNFTStakingFactory.
    SingleNftStaking,
    /// MultiNFTStaking template + MultiNFTStakingFactory.
    MultiNftStaking,
}

impl Family {
    /// The contract cloned by the factory.
    pub fn template_contract(&self) -> ContractName {
        match self {
            Family::Marketplace => ContractName::Merchant,
            Family::SingleNftStaking => ContractName::SingleNftStaking,
            Family::MultiNftStaking => ContractName::MultiNftStaking,
        }
    }

    /// The factory implementation contract living behind the proxy.
    pub fn factory_contract(&self) -> ContractName {
        match self {
            Family::Marketplace => ContractName::SlashFactory,
            Family::SingleNftStaking => ContractName::SingleNftStakingFactory,
            Family::MultiNftStaking => ContractName::MultiNftStakingFactory,
        }
    }

    /// Whether the factory registers subscription plans and APR tiers.
    pub fn is_staking(&self) -> bool {
        matches!(self, Family::SingleNftStaking | Family::MultiNftStaking)
    }

    pub fn role(self, kind: RoleKind) -> Role {
        Role { family: self, kind }
    }
}

/// What a bound address is within its family.
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
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RoleKind {
    Template,
    /// Factory implementation behind the proxy.
    Implementation,
    /// The factory proxy; the address users interact with.
    Factory,
    /// Implementation deployed by an upgrade stage.
    UpgradedImplementation,
}

/// Logical role of an on-chain address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Role {
    pub family: Family,
    pub kind: RoleKind,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.kind)
    }
}

/// How a role got its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Binding {
    /// Produced by a transaction in this run.
    Deployed,
    /// Supplied as a literal address, no transaction.
    Attached,
}

/// In-memory map from [`Role`] to address for a single run.
///
/// Every role is bound at most once. Later stages read their inputs from here and
/// never from configuration directly, so a stage can only reference an address
/// that an earlier stage produced or attached.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    bindings: BTreeMap<Role, Address>,
    attached: BTreeSet<Role>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `role` to an address produced by a transaction.
    pub fn record(&mut self, role: Role, address: Address) -> Result<(), DeployError> {
        if self.bindings.contains_key(&role) {
            return Err(DeployError::DuplicateRole { role });
        }

        tracing::debug!(role = %role, address = %address, "Recorded address");
        self.bindings.insert(role, address);
        Ok(())
    }

    /// Bind `role` to a pre-known address without submitting anything.
    pub fn attach(&mut self, role: Role, address: Address) -> Result<(), DeployError> {
        self.record(role, address)?;
        self.attached.insert(role);
        tracing::info!(role = %role, address = %address, "Attached existing contract");
        Ok(())
    }

    /// The address bound to `role`, or [`DeployError::UnresolvedDependency`].
    pub fn resolve(&self, role: Role) -> Result<Address, DeployError> {
        self.bindings
            .get(&role)
            .copied()
            .ok_or(DeployError::UnresolvedDependency { role })
    }

    pub fn get(&self, role: Role) -> Option<Address> {
        self.bindings.get(&role).copied()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.bindings.contains_key(&role)
    }

    /// All bindings in role order.
    pub fn iter(&self) -> impl Iterator<Item = (Role, Address, Binding)> + '_ {
        self.bindings.iter().map(|(role, address)| {
            let binding = if self.attached.contains(role) {
                Binding::Attached
            } else {
                Binding::Deployed
            };
            (*role, *address, binding)
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

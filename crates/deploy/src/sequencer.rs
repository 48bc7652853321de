//! Sequential factory configuration: subscription plans, then APR tiers.

use alloy_core::primitives::{Address, TxHash, U256, utils::parse_ether};
use serde::{Deserialize, Serialize};

use crate::{
    DeployError,
    chain::{Chain, TxRequest},
    contracts::StakingFactory,
    executor::StageExecutor,
};

/// A subscription plan as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub name: String,
    /// Validity period in seconds.
    pub period: u64,
    /// Price in whole tokens, as a decimal literal (`"1"`, `"0.5"`).
    pub price: String,
}

impl SubscriptionConfig {
    pub fn new(name: impl Into<String>, period: u64, price: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            period,
            price: price.into(),
        }
    }
}

/// A validated subscription plan with its price in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub name: String,
    pub period_seconds: u64,
    pub price_wei: U256,
}

impl TryFrom<&SubscriptionConfig> for SubscriptionPlan {
    type Error = DeployError;

    fn try_from(config: &SubscriptionConfig) -> Result<Self, Self::Error> {
        if config.name.trim().is_empty() {
            return Err(DeployError::InvalidPlan(
                "subscription name must not be empty".to_string(),
            ));
        }

        if config.period == 0 {
            return Err(DeployError::InvalidPlan(format!(
                "subscription {} must have a positive period",
                config.name
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            period_seconds: config.period,
            price_wei: parse_price(&config.price)?,
        })
    }
}

/// An APR option in the factory's units, tenths of a percent (80 is 8%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AprTier {
    pub rate: u64,
}

impl From<u64> for AprTier {
    fn from(rate: u64) -> Self {
        Self { rate }
    }
}

/// Convert a decimal token amount to 18-decimal base units.
///
/// `"1"` becomes `10^18`. Negative values and more than 18 fractional digits are
/// rejected.
pub fn parse_price(literal: &str) -> Result<U256, DeployError> {
    let literal = literal.trim();
    if literal.is_empty() || literal.starts_with('-') {
        return Err(DeployError::InvalidPlan(format!(
            "invalid price literal {:?}",
            literal
        )));
    }

    if literal
        .split_once('.')
        .is_some_and(|(_, fraction)| fraction.len() > 18)
    {
        return Err(DeployError::InvalidPlan(format!(
            "invalid price literal {:?}: more than 18 fractional digits",
            literal
        )));
    }

    parse_ether(literal)
        .map_err(|e| DeployError::InvalidPlan(format!("invalid price literal {:?}: {}", literal, e)))
}

/// A factory and the entries to register on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationTarget {
    pub factory_address: Address,
    pub subscriptions: Vec<SubscriptionPlan>,
    pub aprs: Vec<AprTier>,
}

/// Which configuration call an entry issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EntryKind {
    Subscription { index: usize, name: String },
    Apr { index: usize, rate: u64 },
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Subscription { index, name } => {
                write!(f, "addSubscription #{} ({})", index, name)
            }
            EntryKind::Apr { index, rate } => write!(f, "addApr #{} ({})", index, rate),
        }
    }
}

/// Lifecycle of one configuration transaction.
///
/// `Pending -> Submitted -> Mined` or `Pending -> Submitted -> Failed`. An entry
/// whose submission is rejected goes straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tx_hash", rename_all = "kebab-case")]
pub enum EntryState {
    Pending,
    Submitted(TxHash),
    Mined(TxHash),
    Failed(Option<TxHash>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationEntry {
    pub kind: EntryKind,
    pub state: EntryState,
}

/// Per-entry progress of one factory initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationReport {
    pub factory_address: Address,
    pub entries: Vec<InitializationEntry>,
}

impl InitializationReport {
    /// All entries of `target` in submission order, every one `Pending`.
    pub fn new(target: &InitializationTarget) -> Self {
        let subscriptions = target
            .subscriptions
            .iter()
            .enumerate()
            .map(|(index, plan)| EntryKind::Subscription {
                index,
                name: plan.name.clone(),
            });
        let aprs = target
            .aprs
            .iter()
            .enumerate()
            .map(|(index, tier)| EntryKind::Apr {
                index,
                rate: tier.rate,
            });

        Self {
            factory_address: target.factory_address,
            entries: subscriptions
                .chain(aprs)
                .map(|kind| InitializationEntry {
                    kind,
                    state: EntryState::Pending,
                })
                .collect(),
        }
    }

    pub fn mined(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::Mined(_)))
            .count()
    }

    /// Entries that reached the chain, whatever their receipt said.
    pub fn sent(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.state,
                    EntryState::Submitted(_) | EntryState::Mined(_) | EntryState::Failed(Some(_))
                )
            })
            .count()
    }

    pub fn failed(&self) -> Option<&InitializationEntry> {
        self.entries
            .iter()
            .find(|e| matches!(e.state, EntryState::Failed(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.mined() == self.entries.len()
    }
}

/// Registers subscription plans and APR tiers on a staking factory.
///
/// Entries go out one at a time from the run's signing account, each mined
/// before the next is submitted: the factory assigns indexes in arrival order, so
/// entry `i` becomes index `i`. The first failure stops the sequence and the
/// remaining entries stay `Pending`. The factory is append-only; running the
/// same target twice registers every entry twice.
pub struct InitializationSequencer<'a, C> {
    executor: &'a StageExecutor<C>,
}

impl<'a, C: Chain> InitializationSequencer<'a, C> {
    pub fn new(executor: &'a StageExecutor<C>) -> Self {
        Self { executor }
    }

    /// Issue every entry of `target`, recording progress into `report`.
    ///
    /// `report` must come from [`InitializationReport::new`] for the same target,
    /// otherwise nothing is sent.
    pub async fn run(
        &self,
        target: &InitializationTarget,
        report: &mut InitializationReport,
    ) -> Result<(), DeployError> {
        let expected = target.subscriptions.len() + target.aprs.len();
        if report.factory_address != target.factory_address || report.entries.len() != expected {
            return Err(DeployError::InvalidPlan(format!(
                "initialization report for {} has {} entries, target {} needs {}",
                report.factory_address,
                report.entries.len(),
                target.factory_address,
                expected
            )));
        }

        let factory = StakingFactory::at(target.factory_address);

        tracing::info!(
            factory = %target.factory_address,
            subscriptions = target.subscriptions.len(),
            aprs = target.aprs.len(),
            "Initializing factory..."
        );

        let requests = target
            .subscriptions
            .iter()
            .map(|plan| factory.add_subscription(&plan.name, plan.period_seconds, plan.price_wei))
            .chain(target.aprs.iter().map(|tier| factory.add_apr(tier.rate)));

        for (entry, tx) in report.entries.iter_mut().zip(requests) {
            self.issue(entry, tx).await?;
        }

        tracing::info!(
            factory = %target.factory_address,
            transactions = report.mined(),
            "Factory initialized"
        );

        Ok(())
    }

    async fn issue(&self, entry: &mut InitializationEntry, tx: TxRequest) -> Result<(), DeployError> {
        let stage = entry.kind.to_string();

        let tx_hash = match self.executor.submit(&stage, tx).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                entry.state = EntryState::Failed(None);
                return Err(err);
            }
        };
        entry.state = EntryState::Submitted(tx_hash);

        match self.executor.confirm(&stage, tx_hash).await {
            Ok(_) => {
                entry.state = EntryState::Mined(tx_hash);
                tracing::info!(entry = %entry.kind, tx_hash = %tx_hash, "Entry registered");
                Ok(())
            }
            Err(err) => {
                entry.state = EntryState::Failed(Some(tx_hash));
                Err(err)
            }
        }
    }
}

//! Plan-driven rollout of contract families.
//!
//! A [`DeploymentPlan`] is built once before the run and only read afterwards.
//! For every family the planner walks the stages in a fixed order; a disabled
//! stage has no side effects, and a role that a disabled deploy stage would have
//! produced can be attached from a literal address instead.

use alloy_core::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    AddressRegistry, DeployError,
    chain::Chain,
    confirm::{ConfirmationConfig, ConfirmationWaiter, WaitPolicy},
    contracts::{ContractName, FactoryInitializer, SlashFactory, UpgradeableProxy},
    executor::{ContractArtifactReference, ProxyRequest, StageExecutor},
    registry::{Family, Role, RoleKind},
    report::{RunReport, VerificationRecord},
    sequencer::{
        AprTier, InitializationReport, InitializationSequencer, InitializationTarget,
        SubscriptionPlan,
    },
    verify::{VerificationOutcome, VerificationService, Verifier},
};

/// Stages of a family rollout, in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    DeployTemplate,
    VerifyTemplate,
    DeployFactory,
    VerifyFactory,
    UpgradeFactory,
    CloneMerchant,
    Initialize,
}

impl Stage {
    /// Whether `family` has anything to do in this stage.
    pub fn supported_by(self, family: Family) -> bool {
        match self {
            Stage::CloneMerchant => family == Family::Marketplace,
            Stage::Initialize => family.is_staking(),
            _ => true,
        }
    }
}

/// One enable flag per [`Stage`]. Missing flags are off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageFlags {
    pub deploy_template: bool,
    pub verify_template: bool,
    pub deploy_factory: bool,
    pub verify_factory: bool,
    pub upgrade_factory: bool,
    pub clone_merchant: bool,
    pub initialize: bool,
}

impl StageFlags {
    /// Fresh rollout: deploy and verify template and factory.
    pub fn fresh() -> Self {
        Self {
            deploy_template: true,
            verify_template: true,
            deploy_factory: true,
            verify_factory: true,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::DeployTemplate => self.deploy_template,
            Stage::VerifyTemplate => self.verify_template,
            Stage::DeployFactory => self.deploy_factory,
            Stage::VerifyFactory => self.verify_factory,
            Stage::UpgradeFactory => self.upgrade_factory,
            Stage::CloneMerchant => self.clone_merchant,
            Stage::Initialize => self.initialize,
        }
    }

    /// Enabled stages in execution order.
    pub fn enabled(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::iter().filter(move |stage| self.is_enabled(*stage))
    }
}

/// Arguments of a `deployMerchant` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantClone {
    pub wallet: Address,
    /// Token the merchant accepts; the zero address means the native coin.
    #[serde(default)]
    pub receive_token: Address,
    #[serde(default)]
    pub reserved: Vec<Address>,
}

/// Stages and literal inputs of one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyPlan {
    pub family: Family,
    #[serde(default)]
    pub flags: StageFlags,
    /// Existing template, attached when the template is not deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_address: Option<Address>,
    /// Existing factory proxy, attached when the factory is not deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_address: Option<Address>,
    /// Staking factories: receiver of staking fees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_recipient: Option<Address>,
    /// Marketplace factory owner; defaults to the signing account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    /// Marketplace default controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_controller: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_clone: Option<MerchantClone>,
}

impl FamilyPlan {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            flags: StageFlags::default(),
            template_address: None,
            factory_address: None,
            fee_recipient: None,
            owner: None,
            default_controller: None,
            merchant_clone: None,
        }
    }

    pub fn with_flags(mut self, flags: StageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn attach_template(mut self, address: Address) -> Self {
        self.template_address = Some(address);
        self
    }

    pub fn attach_factory(mut self, address: Address) -> Self {
        self.factory_address = Some(address);
        self
    }

    pub fn with_fee_recipient(mut self, address: Address) -> Self {
        self.fee_recipient = Some(address);
        self
    }

    pub fn with_default_controller(mut self, address: Address) -> Self {
        self.default_controller = Some(address);
        self
    }

    pub fn with_merchant_clone(mut self, clone: MerchantClone) -> Self {
        self.merchant_clone = Some(clone);
        self
    }

    /// Initializer of a newly deployed factory.
    pub fn initializer(&self, signer: Address) -> Result<FactoryInitializer, DeployError> {
        if self.family.is_staking() {
            let fee_recipient = self.fee_recipient.ok_or_else(|| {
                DeployError::InvalidPlan(format!("{}: fee_recipient is required", self.family))
            })?;
            return Ok(FactoryInitializer::Staking { fee_recipient });
        }

        let default_controller = self.default_controller.ok_or_else(|| {
            DeployError::InvalidPlan(format!("{}: default_controller is required", self.family))
        })?;

        Ok(FactoryInitializer::Marketplace {
            owner: self.owner.unwrap_or(signer),
            default_controller,
        })
    }

    pub fn validate(&self) -> Result<(), DeployError> {
        if let Some(stage) = self.flags.enabled().find(|s| !s.supported_by(self.family)) {
            return Err(DeployError::InvalidPlan(format!(
                "{}: stage {} is not supported",
                self.family, stage
            )));
        }

        if self.flags.deploy_template && self.template_address.is_some() {
            return Err(DeployError::InvalidPlan(format!(
                "{}: template is both deployed and attached",
                self.family
            )));
        }

        if self.flags.deploy_factory && self.factory_address.is_some() {
            return Err(DeployError::InvalidPlan(format!(
                "{}: factory is both deployed and attached",
                self.family
            )));
        }

        if self.flags.deploy_factory {
            // The signer only fills in a missing owner, any address does here.
            self.initializer(Address::ZERO)?;
        }

        if self.flags.clone_merchant && self.merchant_clone.is_none() {
            return Err(DeployError::InvalidPlan(format!(
                "{}: merchant_clone is required to clone a merchant",
                self.family
            )));
        }

        Ok(())
    }
}

/// Immutable description of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeploymentPlan {
    /// Rolled out in order.
    pub families: Vec<FamilyPlan>,
    pub confirmations: ConfirmationConfig,
    /// Registered on every staking factory with `initialize` enabled.
    pub subscriptions: Vec<SubscriptionPlan>,
    pub aprs: Vec<AprTier>,
}

impl DeploymentPlan {
    /// Reject plans that could never complete, before anything is sent.
    pub fn validate(&self) -> Result<(), DeployError> {
        for (i, plan) in self.families.iter().enumerate() {
            if self.families[..i].iter().any(|p| p.family == plan.family) {
                return Err(DeployError::InvalidPlan(format!(
                    "family {} is listed twice",
                    plan.family
                )));
            }
            plan.validate()?;
        }

        for subscription in &self.subscriptions {
            if subscription.name.trim().is_empty() || subscription.period_seconds == 0 {
                return Err(DeployError::InvalidPlan(format!(
                    "invalid subscription plan {:?}",
                    subscription.name
                )));
            }
        }

        Ok(())
    }
}

/// A fatal error together with what the run did before it.
#[derive(Debug, thiserror::Error)]
#[error("rollout aborted: {error}")]
pub struct RunFailure {
    #[source]
    pub error: DeployError,
    pub report: Box<RunReport>,
}

/// Drives a [`DeploymentPlan`] through the executor, the waiter and the verifier.
pub struct DeploymentPlanner<C, V> {
    plan: DeploymentPlan,
    executor: StageExecutor<C>,
    verifier: Verifier<V>,
    waiter: ConfirmationWaiter,
}

impl<C: Chain, V: VerificationService> DeploymentPlanner<C, V> {
    pub fn new(plan: DeploymentPlan, executor: StageExecutor<C>, verifier: Verifier<V>) -> Self {
        Self {
            plan,
            executor,
            verifier,
            waiter: ConfirmationWaiter::new(),
        }
    }

    pub fn with_waiter(mut self, waiter: ConfirmationWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn executor(&self) -> &StageExecutor<C> {
        &self.executor
    }

    /// Run every enabled stage of every family, stopping at the first fatal error.
    ///
    /// Contracts deployed before a failure stay on chain; the report in
    /// [`RunFailure`] lists them so the next run can attach them.
    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        let chain = self.executor.chain();
        let signer = chain.signer_address();

        let chain_id = match chain.chain_id().await {
            Ok(chain_id) => chain_id,
            Err(err) => {
                return Err(RunFailure {
                    error: DeployError::transaction("connect", err),
                    report: Box::new(RunReport::new(0, signer)),
                });
            }
        };

        let mut report = RunReport::new(chain_id, signer);
        let mut registry = AddressRegistry::new();

        tracing::info!(
            chain_id,
            signer = %signer,
            families = self.plan.families.len(),
            "Starting rollout..."
        );

        let result = self.execute(&mut registry, &mut report).await;
        report.finish(&registry);

        match result {
            Ok(()) => {
                tracing::info!(
                    transactions = report.transaction_count(),
                    "Rollout complete"
                );
                Ok(report)
            }
            Err(error) => {
                tracing::error!(
                    error = %error,
                    transactions = report.transaction_count(),
                    "Rollout aborted"
                );
                Err(RunFailure {
                    error,
                    report: Box::new(report),
                })
            }
        }
    }

    async fn execute(
        &self,
        registry: &mut AddressRegistry,
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        self.plan.validate()?;

        for family in &self.plan.families {
            self.run_family(family, registry, report).await?;
        }

        Ok(())
    }

    async fn run_family(
        &self,
        plan: &FamilyPlan,
        registry: &mut AddressRegistry,
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        let family = plan.family;
        let flags = &plan.flags;
        let template = family.role(RoleKind::Template);
        let implementation = family.role(RoleKind::Implementation);
        let factory = family.role(RoleKind::Factory);

        tracing::info!(
            family = %family,
            stages = ?flags.enabled().collect::<Vec<_>>(),
            "Rolling out family..."
        );

        if flags.deploy_template {
            let deployed = self
                .executor
                .deploy(
                    registry,
                    ContractArtifactReference::new(template, family.template_contract()),
                )
                .await?;
            let address = deployed.address;
            report.contracts.push(deployed);

            self.wait_visible(template, &self.plan.confirmations.template, &[address])
                .await?;
        } else if let Some(address) = plan.template_address {
            registry.attach(template, address)?;
        }

        if flags.verify_template {
            self.verify_role(template, family.template_contract(), registry, report)
                .await?;
        }

        if flags.deploy_factory {
            // The initializer embeds the template, so it must be known before
            // the implementation is sent.
            let template_address = registry.resolve(template)?;
            let initializer = plan
                .initializer(self.executor.chain().signer_address())?
                .calldata(template_address);

            let deployed = self
                .executor
                .deploy(
                    registry,
                    ContractArtifactReference::new(implementation, family.factory_contract()),
                )
                .await?;
            let implementation_address = deployed.address;
            report.contracts.push(deployed);

            let proxy = self
                .executor
                .deploy_proxy(
                    registry,
                    ProxyRequest {
                        role: factory,
                        implementation,
                        initializer,
                    },
                )
                .await?;
            let proxy_address = proxy.proxy_address;
            report.proxies.push(proxy);

            self.wait_visible(
                factory,
                &self.plan.confirmations.proxy,
                &[implementation_address, proxy_address],
            )
            .await?;
        } else if let Some(address) = plan.factory_address {
            registry.attach(factory, address)?;
        }

        if flags.verify_factory {
            if !registry.contains(implementation) {
                let proxy = registry.resolve(factory)?;
                let address = self
                    .executor
                    .implementation_of(&format!("verify {}", implementation), proxy)
                    .await?;
                registry.attach(implementation, address)?;
            }

            self.verify_role(implementation, family.factory_contract(), registry, report)
                .await?;
        }

        if flags.upgrade_factory {
            let proxy = registry.resolve(factory)?;
            let upgraded = family.role(RoleKind::UpgradedImplementation);

            let deployed = self
                .executor
                .deploy(
                    registry,
                    ContractArtifactReference::new(upgraded, family.factory_contract()),
                )
                .await?;
            let new_implementation = deployed.address;
            report.contracts.push(deployed);

            let tx = self
                .executor
                .call(
                    &format!("upgrade {}", factory),
                    UpgradeableProxy::at(proxy).upgrade_to(new_implementation),
                )
                .await?;
            report.transactions.push(tx);

            tracing::info!(
                factory = %proxy,
                implementation = %new_implementation,
                "Factory upgraded"
            );
        }

        if flags.clone_merchant {
            let factory_address = registry.resolve(factory)?;
            let clone = plan.merchant_clone.as_ref().ok_or_else(|| {
                DeployError::InvalidPlan(format!("{}: merchant_clone is missing", family))
            })?;

            let tx = self
                .executor
                .call(
                    &format!("clone merchant from {}", factory),
                    SlashFactory::at(factory_address).deploy_merchant(
                        clone.wallet,
                        clone.receive_token,
                        clone.reserved.clone(),
                    ),
                )
                .await?;
            report.transactions.push(tx);
        }

        if flags.initialize {
            let target = InitializationTarget {
                factory_address: registry.resolve(factory)?,
                subscriptions: self.plan.subscriptions.clone(),
                aprs: self.plan.aprs.clone(),
            };
            let mut initialization = InitializationReport::new(&target);

            let result = InitializationSequencer::new(&self.executor)
                .run(&target, &mut initialization)
                .await;
            report.initializations.push(initialization);
            result?;
        }

        Ok(())
    }

    async fn verify_role(
        &self,
        role: Role,
        contract: ContractName,
        registry: &AddressRegistry,
        report: &mut RunReport,
    ) -> Result<(), DeployError> {
        let address = registry.resolve(role)?;
        let stage = format!("verify {}", role);

        let outcome = match self.executor.artifacts().artifact(contract) {
            Ok(artifact) => {
                self.verifier
                    .verify(&stage, address, artifact, &Bytes::new())
                    .await
            }
            Err(err) => {
                tracing::warn!(stage = %stage, error = %err, "Cannot verify without an artifact, continuing");
                VerificationOutcome::Failed(err.to_string())
            }
        };

        if let Some(contract) = report.contracts.iter_mut().find(|c| c.role == role) {
            contract.apply_verification(&outcome);
        }
        report.verifications.push(VerificationRecord {
            role,
            address,
            outcome,
        });

        Ok(())
    }

    async fn wait_visible(
        &self,
        role: Role,
        policy: &WaitPolicy,
        addresses: &[Address],
    ) -> Result<(), DeployError> {
        let stage = format!("wait {}", role);
        self.waiter
            .wait(&stage, policy, move || self.all_visible(addresses))
            .await
    }

    /// Visible to the verification service if there is one, else to the node.
    async fn all_visible(&self, addresses: &[Address]) -> anyhow::Result<bool> {
        for address in addresses {
            let visible = match self.verifier.service() {
                Some(service) => service.is_indexed(*address).await?,
                None => !self.executor.chain().code_at(*address).await?.is_empty(),
            };
            if !visible {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staking() -> FamilyPlan {
        FamilyPlan::new(Family::SingleNftStaking)
            .with_flags(StageFlags::fresh())
            .with_fee_recipient(Address::repeat_byte(0xfe))
    }

    #[test]
    fn test_enabled_stages_follow_execution_order() {
        let flags = StageFlags {
            initialize: true,
            deploy_template: true,
            verify_factory: true,
            ..Default::default()
        };

        assert_eq!(
            flags.enabled().collect::<Vec<_>>(),
            vec![Stage::DeployTemplate, Stage::VerifyFactory, Stage::Initialize]
        );
    }

    #[test]
    fn test_stage_support() {
        assert!(Stage::CloneMerchant.supported_by(Family::Marketplace));
        assert!(!Stage::CloneMerchant.supported_by(Family::MultiNftStaking));
        assert!(Stage::Initialize.supported_by(Family::MultiNftStaking));
        assert!(!Stage::Initialize.supported_by(Family::Marketplace));
        assert!(Stage::UpgradeFactory.supported_by(Family::Marketplace));
    }

    #[test]
    fn test_valid_fresh_plan() {
        staking().validate().unwrap();
    }

    #[test]
    fn test_deploy_and_attach_conflict() {
        let err = staking()
            .attach_template(Address::repeat_byte(1))
            .validate()
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidPlan(msg) if msg.contains("template")));
    }

    #[test]
    fn test_unsupported_stage_rejected() {
        let plan = FamilyPlan::new(Family::Marketplace).with_flags(StageFlags {
            initialize: true,
            ..Default::default()
        });
        assert!(matches!(plan.validate(), Err(DeployError::InvalidPlan(_))));
    }

    #[test]
    fn test_factory_requires_initializer_inputs() {
        let plan = FamilyPlan::new(Family::MultiNftStaking).with_flags(StageFlags::fresh());
        assert!(matches!(plan.validate(), Err(DeployError::InvalidPlan(_))));

        let plan = FamilyPlan::new(Family::Marketplace).with_flags(StageFlags::fresh());
        assert!(matches!(plan.validate(), Err(DeployError::InvalidPlan(_))));
    }

    #[test]
    fn test_marketplace_owner_defaults_to_signer() {
        let signer = Address::repeat_byte(0x5a);
        let plan = FamilyPlan::new(Family::Marketplace)
            .with_default_controller(Address::repeat_byte(0x0c));

        assert_eq!(
            plan.initializer(signer).unwrap(),
            FactoryInitializer::Marketplace {
                owner: signer,
                default_controller: Address::repeat_byte(0x0c),
            }
        );
    }

    #[test]
    fn test_duplicate_family_rejected() {
        let plan = DeploymentPlan {
            families: vec![staking(), staking()],
            ..Default::default()
        };
        assert!(matches!(plan.validate(), Err(DeployError::InvalidPlan(_))));
    }

    #[test]
    fn test_flags_from_toml_default_off() {
        let plan: FamilyPlan = toml::from_str(
            r#"
            family = "marketplace"
            factory_address = "0x052314b94D8609F1F60674e239E783d0B2bFD0dC"

            [flags]
            clone_merchant = true

            [merchant_clone]
            wallet = "0x7861e0f3b46e7C4Eac4c2fA3c603570d58bd1d97"
            "#,
        )
        .unwrap();

        assert_eq!(
            plan.flags.enabled().collect::<Vec<_>>(),
            vec![Stage::CloneMerchant]
        );
        let clone = plan.merchant_clone.as_ref().unwrap();
        assert_eq!(clone.receive_token, Address::ZERO);
        assert!(clone.reserved.is_empty());
        plan.validate().unwrap();
    }
}

//! End-to-end rollout tests against the in-memory chain.
//!
//! Run with: cargo test --test pipeline_test

use std::sync::{Arc, Mutex};

use alloy_core::primitives::{Address, Bytes, U256, address};
use alloy_sol_types::{SolCall, SolValue};
use slashkit_deploy::{
    AprTier, Artifacts, Binding, Chain, ConfirmationConfig, ConfirmationState, ConfirmationWaiter,
    ContractName, DeployError, DeploymentPlan, DeploymentPlanner, EntryState, Family, FamilyPlan,
    MerchantClone, RoleKind, RunFailure, RunReport, SimulatedChain, StageExecutor, StageFlags,
    SubscriptionConfig, SubscriptionPlan, VerificationOutcome, VerificationService, Verifier,
    WaitPolicy,
    chain::SimulatedTx,
    contracts::{
        ContractArtifact, IMPLEMENTATION_SLOT, ISlashFactory, IStakingFactory, IUUPSUpgradeable,
    },
    verify::VerificationRequest,
};
use strum::IntoEnumIterator;
use tokio::sync::watch;

const MERCHANT_TEMPLATE: Address = address!("8c878d705de10b7a31c82922afd870bc4f7d2b66");
const DEFAULT_CONTROLLER: Address = address!("8c4ac09b2fd85d8dff274a26d9b8ece2d84210d8");
const FEE_RECIPIENT: Address = address!("fefefefefefefefefefefefefefefefefefefefe");
const STAKING_FACTORY: Address = address!("20f8ba84d67bf436e9cbc4920f781009566d76f2");

/// Verification service that records requests and can be told to reject them.
#[derive(Clone, Default)]
struct RecordingService {
    reject: bool,
    requests: Arc<Mutex<Vec<VerificationRequest>>>,
}

impl RecordingService {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    fn verified_addresses(&self) -> Vec<Address> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.address)
            .collect()
    }
}

impl VerificationService for RecordingService {
    async fn submit(&self, request: &VerificationRequest) -> anyhow::Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.reject {
            anyhow::bail!("Contract source code already verified");
        }
        Ok(())
    }

    async fn is_indexed(&self, _address: Address) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// One distinct placeholder bytecode per contract.
fn artifacts() -> Artifacts {
    ContractName::iter()
        .enumerate()
        .map(|(i, name)| ContractArtifact::new(name, vec![0x60, 0x80, i as u8]))
        .collect()
}

fn bytecode(name: ContractName) -> Bytes {
    artifacts().artifact(name).unwrap().bytecode.clone()
}

fn plan(families: Vec<FamilyPlan>) -> DeploymentPlan {
    DeploymentPlan {
        families,
        confirmations: ConfirmationConfig::skip(),
        subscriptions: [
            SubscriptionConfig::new("Basic", 2_592_000, "1"),
            SubscriptionConfig::new("Standard", 7_776_000, "3"),
            SubscriptionConfig::new("Premium", 15_552_000, "5"),
        ]
        .iter()
        .map(|s| SubscriptionPlan::try_from(s).unwrap())
        .collect(),
        aprs: vec![AprTier::from(80), AprTier::from(120), AprTier::from(180)],
    }
}

async fn run(
    chain: &SimulatedChain,
    service: RecordingService,
    families: Vec<FamilyPlan>,
) -> Result<RunReport, RunFailure> {
    DeploymentPlanner::new(
        plan(families),
        StageExecutor::new(chain.clone(), artifacts()),
        Verifier::new(service),
    )
    .run()
    .await
}

/// Split a proxy creation input into implementation and initializer calldata.
fn proxy_args(tx: &SimulatedTx) -> (Address, Bytes) {
    let code = bytecode(ContractName::Erc1967Proxy);
    assert!(tx.request.is_creation());
    assert!(tx.request.input.starts_with(&code));
    <(Address, Bytes)>::abi_decode_params(&tx.request.input[code.len()..]).unwrap()
}

fn staking_init() -> FamilyPlan {
    FamilyPlan::new(Family::SingleNftStaking)
        .attach_factory(STAKING_FACTORY)
        .with_flags(StageFlags {
            initialize: true,
            ..Default::default()
        })
}

#[tokio::test]
async fn test_marketplace_factory_with_attached_template() {
    let chain = SimulatedChain::default();
    let family = FamilyPlan::new(Family::Marketplace)
        .attach_template(MERCHANT_TEMPLATE)
        .with_default_controller(DEFAULT_CONTROLLER)
        .with_flags(StageFlags {
            deploy_factory: true,
            ..Default::default()
        });

    let report = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap();

    // Implementation, then proxy. No clone transaction.
    let txs = chain.transactions();
    assert_eq!(txs.len(), 2);
    assert!(txs[0].request.input.starts_with(&bytecode(ContractName::SlashFactory)));
    assert!(
        txs.iter()
            .all(|tx| !tx.request.input.starts_with(ISlashFactory::deployMerchantCall::SELECTOR.as_slice()))
    );

    let (implementation, initializer) = proxy_args(&txs[1]);
    assert_eq!(Some(implementation), txs[0].created);

    let init = ISlashFactory::initializeCall::abi_decode(&initializer).unwrap();
    assert_eq!(init.owner, chain.signer_address());
    assert_eq!(init.merchantTemplate, MERCHANT_TEMPLATE);
    assert_eq!(init.defaultController, DEFAULT_CONTROLLER);

    let factory = report
        .binding(Family::Marketplace.role(RoleKind::Factory))
        .unwrap();
    assert_eq!(factory.binding, Binding::Deployed);
    assert_eq!(Some(factory.address), txs[1].created);

    let template = report
        .binding(Family::Marketplace.role(RoleKind::Template))
        .unwrap();
    assert_eq!(template.binding, Binding::Attached);
    assert_eq!(template.address, MERCHANT_TEMPLATE);

    assert_eq!(report.proxies.len(), 1);
    assert_eq!(report.proxies[0].implementation_address, implementation);
}

#[tokio::test]
async fn test_clone_merchant_on_attached_factory() {
    let chain = SimulatedChain::default();
    let factory = Address::repeat_byte(0x05);
    let wallet = Address::repeat_byte(0x78);
    let family = FamilyPlan::new(Family::Marketplace)
        .attach_factory(factory)
        .with_merchant_clone(MerchantClone {
            wallet,
            receive_token: Address::ZERO,
            reserved: vec![],
        })
        .with_flags(StageFlags {
            clone_merchant: true,
            ..Default::default()
        });

    let report = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap();

    let txs = chain.transactions();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].request.to, Some(factory));

    let call = ISlashFactory::deployMerchantCall::abi_decode(&txs[0].request.input).unwrap();
    assert_eq!(call.merchantWallet, wallet);
    assert_eq!(call.receiveToken, Address::ZERO);
    assert!(call.reserved.is_empty());

    assert_eq!(report.transactions.len(), 1);
}

#[tokio::test]
async fn test_initialization_sends_six_ordered_transactions() {
    let chain = SimulatedChain::default();

    let report = run(&chain, RecordingService::default(), vec![staking_init()])
        .await
        .unwrap();

    let txs = chain.transactions();
    assert_eq!(txs.len(), 6);
    assert!(txs.iter().all(|tx| tx.request.to == Some(STAKING_FACTORY)));

    let one_token = U256::from(10u64).pow(U256::from(18));
    let subscriptions: Vec<_> = txs[..3]
        .iter()
        .map(|tx| IStakingFactory::addSubscriptionCall::abi_decode(&tx.request.input).unwrap())
        .collect();
    assert_eq!(
        subscriptions
            .iter()
            .map(|c| (c.name.as_str(), c.period, c.price))
            .collect::<Vec<_>>(),
        vec![
            ("Basic", U256::from(2_592_000u64), one_token),
            ("Standard", U256::from(7_776_000u64), one_token * U256::from(3u64)),
            ("Premium", U256::from(15_552_000u64), one_token * U256::from(5u64)),
        ]
    );

    let aprs: Vec<_> = txs[3..]
        .iter()
        .map(|tx| IStakingFactory::addAprCall::abi_decode(&tx.request.input).unwrap().apr)
        .collect();
    assert_eq!(
        aprs,
        vec![U256::from(80u64), U256::from(120u64), U256::from(180u64)]
    );

    assert_eq!(report.initializations.len(), 1);
    assert!(report.initializations[0].is_complete());
    assert_eq!(report.transaction_count(), 6);
}

#[tokio::test]
async fn test_unresolved_template_fails_before_any_transaction() {
    let chain = SimulatedChain::default();
    let family = FamilyPlan::new(Family::MultiNftStaking)
        .with_fee_recipient(FEE_RECIPIENT)
        .with_flags(StageFlags {
            deploy_factory: true,
            ..Default::default()
        });

    let failure = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        DeployError::UnresolvedDependency { role }
            if role == Family::MultiNftStaking.role(RoleKind::Template)
    ));
    assert!(chain.transactions().is_empty());
    assert!(failure.report.bindings.is_empty());
}

#[tokio::test]
async fn test_invalid_plan_sends_nothing() {
    let chain = SimulatedChain::default();
    let family = FamilyPlan::new(Family::SingleNftStaking)
        .attach_template(Address::repeat_byte(1))
        .with_fee_recipient(FEE_RECIPIENT)
        .with_flags(StageFlags::fresh());

    let failure = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap_err();

    assert!(matches!(failure.error, DeployError::InvalidPlan(_)));
    assert!(chain.transactions().is_empty());
}

#[tokio::test]
async fn test_verification_failure_does_not_change_outcome() {
    let fresh = || {
        vec![
            FamilyPlan::new(Family::SingleNftStaking)
                .with_fee_recipient(FEE_RECIPIENT)
                .with_flags(StageFlags::fresh()),
        ]
    };

    let verified_chain = SimulatedChain::default();
    let verified = run(&verified_chain, RecordingService::default(), fresh())
        .await
        .unwrap();

    let failing_chain = SimulatedChain::default();
    let service = RecordingService::rejecting();
    let failed = run(&failing_chain, service.clone(), fresh()).await.unwrap();

    assert_eq!(
        verified_chain.transactions(),
        failing_chain.transactions()
    );
    assert_eq!(verified.bindings, failed.bindings);

    // Template and implementation were both attempted.
    let template = failed
        .contract(Family::SingleNftStaking.role(RoleKind::Template))
        .unwrap();
    let implementation = failed
        .contract(Family::SingleNftStaking.role(RoleKind::Implementation))
        .unwrap();
    assert_eq!(
        service.verified_addresses(),
        vec![template.address, implementation.address]
    );

    assert!(failed.contracts.iter().all(|c| c.state == ConfirmationState::VerificationFailed));
    assert!(verified.contracts.iter().all(|c| c.state == ConfirmationState::Verified));
    assert!(
        failed
            .verifications
            .iter()
            .all(|v| matches!(v.outcome, VerificationOutcome::Failed(_)))
    );
}

#[tokio::test]
async fn test_verify_attached_factory_reads_implementation_slot() {
    let chain = SimulatedChain::default();
    let implementation = Address::repeat_byte(0x0d);
    chain.set_storage(STAKING_FACTORY, IMPLEMENTATION_SLOT, implementation.into_word());

    let service = RecordingService::default();
    let family = FamilyPlan::new(Family::SingleNftStaking)
        .attach_factory(STAKING_FACTORY)
        .with_flags(StageFlags {
            verify_factory: true,
            ..Default::default()
        });

    let report = run(&chain, service.clone(), vec![family]).await.unwrap();

    assert!(chain.transactions().is_empty());
    assert_eq!(service.verified_addresses(), vec![implementation]);

    let binding = report
        .binding(Family::SingleNftStaking.role(RoleKind::Implementation))
        .unwrap();
    assert_eq!(binding.address, implementation);
    assert_eq!(binding.binding, Binding::Attached);
}

#[tokio::test]
async fn test_verify_attached_factory_without_implementation_is_fatal() {
    let chain = SimulatedChain::default();
    let family = FamilyPlan::new(Family::SingleNftStaking)
        .attach_factory(STAKING_FACTORY)
        .with_flags(StageFlags {
            verify_factory: true,
            ..Default::default()
        });

    let failure = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap_err();

    assert!(matches!(failure.error, DeployError::Transaction { .. }));
}

#[tokio::test]
async fn test_upgrade_factory() {
    let chain = SimulatedChain::default();
    let family = FamilyPlan::new(Family::Marketplace)
        .attach_factory(Address::repeat_byte(0x05))
        .with_flags(StageFlags {
            upgrade_factory: true,
            ..Default::default()
        });

    let report = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap();

    let txs = chain.transactions();
    assert_eq!(txs.len(), 2);
    assert!(txs[0].request.input.starts_with(&bytecode(ContractName::SlashFactory)));

    let call = IUUPSUpgradeable::upgradeToCall::abi_decode(&txs[1].request.input).unwrap();
    assert_eq!(Some(call.newImplementation), txs[0].created);
    assert_eq!(txs[1].request.to, Some(Address::repeat_byte(0x05)));

    assert!(
        report
            .binding(Family::Marketplace.role(RoleKind::UpgradedImplementation))
            .is_some()
    );
}

#[tokio::test]
async fn test_abort_mid_initialization_keeps_earlier_entries() {
    let chain = SimulatedChain::default();
    // Second subscription reverts.
    chain.revert_at(1);

    let failure = run(
        &chain,
        RecordingService::default(),
        vec![
            staking_init(),
            FamilyPlan::new(Family::MultiNftStaking)
                .attach_factory(Address::repeat_byte(0x21))
                .with_flags(StageFlags {
                    initialize: true,
                    ..Default::default()
                }),
        ],
    )
    .await
    .unwrap_err();

    assert!(matches!(failure.error, DeployError::Reverted { .. }));
    assert_eq!(chain.transactions().len(), 2);

    // The second family never started.
    let initializations = &failure.report.initializations;
    assert_eq!(initializations.len(), 1);
    let entries = &initializations[0].entries;
    assert!(matches!(entries[0].state, EntryState::Mined(_)));
    assert!(matches!(entries[1].state, EntryState::Failed(Some(_))));
    assert!(entries[2..].iter().all(|e| e.state == EntryState::Pending));
}

#[tokio::test]
async fn test_failed_deployment_reports_earlier_contracts() {
    let chain = SimulatedChain::default();
    // Template mines, implementation reverts.
    chain.revert_at(1);

    let family = FamilyPlan::new(Family::SingleNftStaking)
        .with_fee_recipient(FEE_RECIPIENT)
        .with_flags(StageFlags::fresh());

    let failure = run(&chain, RecordingService::default(), vec![family])
        .await
        .unwrap_err();

    assert!(matches!(failure.error, DeployError::Reverted { .. }));
    assert_eq!(failure.report.contracts.len(), 1);
    assert_eq!(
        failure.report.contracts[0].role,
        Family::SingleNftStaking.role(RoleKind::Template)
    );
    assert_eq!(failure.report.bindings.len(), 1);
}

#[tokio::test]
async fn test_poll_wait_uses_chain_code_without_verifier() {
    let chain = SimulatedChain::default();
    let mut plan = plan(vec![
        FamilyPlan::new(Family::MultiNftStaking)
            .with_fee_recipient(FEE_RECIPIENT)
            .with_flags(StageFlags {
                deploy_template: true,
                deploy_factory: true,
                ..Default::default()
            }),
    ]);
    plan.confirmations = ConfirmationConfig {
        template: WaitPolicy::Poll {
            min_delay_ms: 1,
            max_delay_secs: 1,
            max_attempts: 2,
        },
        proxy: WaitPolicy::Poll {
            min_delay_ms: 1,
            max_delay_secs: 1,
            max_attempts: 2,
        },
    };

    let report = DeploymentPlanner::new(
        plan,
        StageExecutor::new(chain.clone(), artifacts()),
        Verifier::<RecordingService>::disabled(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(chain.transactions().len(), 3);
    assert_eq!(report.contracts.len(), 2);
    assert_eq!(report.proxies.len(), 1);
    assert_eq!(report.transaction_count(), chain.transactions().len());
    assert!(
        report
            .proxy(Family::MultiNftStaking.role(RoleKind::Factory))
            .is_some()
    );
    assert!(report.verifications.is_empty());
}

#[tokio::test]
async fn test_cancelled_wait_aborts_run() {
    let chain = SimulatedChain::default();
    let (cancel, cancelled) = watch::channel(false);
    cancel.send(true).unwrap();

    let mut plan = plan(vec![
        FamilyPlan::new(Family::SingleNftStaking)
            .with_fee_recipient(FEE_RECIPIENT)
            .with_flags(StageFlags::fresh()),
    ]);
    plan.confirmations = ConfirmationConfig::fixed();

    let failure = DeploymentPlanner::new(
        plan,
        StageExecutor::new(chain.clone(), artifacts()),
        Verifier::new(RecordingService::default()),
    )
    .with_waiter(ConfirmationWaiter::new().with_cancellation(cancelled))
    .run()
    .await
    .unwrap_err();

    assert!(matches!(failure.error, DeployError::Cancelled { .. }));
    // The template was already mined when the wait started.
    assert_eq!(chain.transactions().len(), 1);
}

//! slashkit deploys, verifies and configures upgradeable contract factories.

mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use tokio::sync::watch;

use cli::Cli;
use slashkit_deploy::{
    Artifacts, Chain, ConfirmationWaiter, DeploymentPlanner, EtherscanClient,
    EtherscanConfig, RolloutConfig, RpcChain, SimulatedChain, StageExecutor,
    VerificationService, Verifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    if cli.init {
        RolloutConfig::default().save_to_file(&cli.config)?;
        return Ok(());
    }

    let mut config = load_config(&cli.config)?;
    cli.apply(&mut config);

    let plan = config.plan().context("Invalid rollout configuration")?;
    let artifacts = Artifacts::load_hardhat(&config.artifacts)?;

    tracing::info!(
        config_path = %cli.config.display(),
        artifacts = artifacts.len(),
        families = plan.families.len(),
        dry_run = cli.dry_run,
        "Loaded rollout plan"
    );

    let waiter = ConfirmationWaiter::new().with_cancellation(cancel_on_ctrl_c());

    if cli.dry_run {
        let executor = StageExecutor::new(SimulatedChain::default(), artifacts);
        let planner = DeploymentPlanner::new(plan, executor, Verifier::<EtherscanClient>::disabled())
            .with_waiter(waiter);
        return execute(planner, &config.outdata).await;
    }

    let rpc_url = cli
        .rpc_url
        .clone()
        .context("RPC_URL is required unless --dry-run is set")?;
    let private_key = cli
        .private_key
        .as_deref()
        .context("PRIVATE_KEY is required unless --dry-run is set")?;

    let chain = RpcChain::connect(rpc_url, private_key)?
        .with_poll_interval(Duration::from_millis(cli.receipt_poll_ms));
    let verifier = build_verifier(&cli, &config, &chain).await?;

    let planner = DeploymentPlanner::new(plan, StageExecutor::new(chain, artifacts), verifier)
        .with_waiter(waiter);

    execute(planner, &config.outdata).await
}

/// Layer `SLASHKIT_` environment variables over the TOML file, or over the
/// built-in rollout when there is no file.
fn load_config(path: &Path) -> Result<RolloutConfig> {
    let path = RolloutConfig::resolve_path(path);

    let base = if path.exists() {
        RolloutConfig::load_from_file(&path)?
    } else {
        tracing::info!(path = %path.display(), "No configuration file, using the built-in rollout");
        RolloutConfig::default()
    };

    Figment::from(Serialized::defaults(base))
        .merge(Env::prefixed("SLASHKIT_").split("__"))
        .extract()
        .context("Failed to load configuration")
}

async fn build_verifier<C: Chain>(
    cli: &Cli,
    config: &RolloutConfig,
    chain: &C,
) -> Result<Verifier<EtherscanClient>> {
    let (Some(api_url), Some(api_key)) = (&config.explorer.api_url, &cli.api_key) else {
        tracing::warn!("No explorer API URL or API key configured, contracts will not be verified");
        return Ok(Verifier::disabled());
    };

    let chain_id = match config.explorer.chain_id {
        Some(chain_id) => chain_id,
        None => chain.chain_id().await?,
    };

    let client = EtherscanClient::new(EtherscanConfig {
        api_url: api_url.clone(),
        api_key: api_key.clone(),
        chain_id: Some(chain_id),
        status_poll_attempts: config.explorer.status_poll_attempts,
    })?;

    Ok(Verifier::new(client))
}

/// A flag that turns `true` on the first Ctrl+C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (cancel, cancelled) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting at the next confirmation wait...");
            let _ = cancel.send(true);
        }
    });

    cancelled
}

/// Run the planner, then print and save the report whatever the outcome.
async fn execute<C: Chain, V: VerificationService>(
    planner: DeploymentPlanner<C, V>,
    outdata: &Path,
) -> Result<()> {
    let (report, error) = match planner.run().await {
        Ok(report) => (report, None),
        Err(failure) => (*failure.report, Some(failure.error)),
    };

    println!("{}", report.table());

    if let Err(err) = report.save_to_dir(outdata) {
        tracing::error!(error = ?err, "Failed to save run report");
    }

    match error {
        Some(error) => Err(anyhow::Error::new(error).context("Rollout aborted")),
        None => Ok(()),
    }
}

use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::Parser;
use slashkit_deploy::{CONFIG_FILENAME, ConfirmationConfig, RolloutConfig};
use tracing::level_filters::LevelFilter;
use url::Url;

/// How to wait after each deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfirmationMode {
    /// Poll the explorer (or the node) until the contract shows up.
    Poll,
    /// Sleep 30s after a contract and 60s after a proxy.
    Fixed,
    /// Do not wait. Useful against local dev chains.
    Skip,
}

impl From<ConfirmationMode> for ConfirmationConfig {
    fn from(mode: ConfirmationMode) -> Self {
        match mode {
            ConfirmationMode::Poll => ConfirmationConfig::default(),
            ConfirmationMode::Fixed => ConfirmationConfig::fixed(),
            ConfirmationMode::Skip => ConfirmationConfig::skip(),
        }
    }
}

#[derive(Parser)]
#[command(name = "slashkit")]
#[command(
    author,
    version,
    about = "Deploy, verify and configure upgradeable staking and marketplace factories"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SLASHKIT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the rollout configuration file.
    ///
    /// A missing file is not an error: the built-in rollout is used, and values can
    /// still be overridden with `SLASHKIT_*` environment variables.
    #[arg(short, long, env = "SLASHKIT_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Write the built-in configuration to the config path and exit.
    #[arg(long)]
    pub init: bool,

    /// JSON-RPC endpoint of the target chain.
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<Url>,

    /// Hex private key of the account paying for every transaction.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Fee recipient for staking factories that do not set one.
    #[arg(long, env = "FEE_ADDRESS")]
    pub fee_address: Option<Address>,

    /// Explorer API key. Verification is skipped without it.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Etherscan-compatible explorer API endpoint, overrides the config.
    #[arg(long, env = "EXPLORER_API_URL")]
    pub explorer_api_url: Option<Url>,

    /// Wait mode after deployments, overrides the config.
    #[arg(long)]
    pub confirmations: Option<ConfirmationMode>,

    /// Receipt polling interval in milliseconds.
    #[arg(long, env = "SLASHKIT_RECEIPT_POLL_MS", default_value_t = 2_000)]
    pub receipt_poll_ms: u64,

    /// Hardhat artifacts directory, overrides the config.
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Directory receiving the run reports, overrides the config.
    #[arg(long)]
    pub outdata: Option<PathBuf>,

    /// Run the plan against an in-memory chain. Nothing is sent and nothing is
    /// verified.
    #[arg(long, env = "SLASHKIT_DRY_RUN")]
    pub dry_run: bool,
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut RolloutConfig) {
        if let Some(artifacts) = &self.artifacts {
            config.artifacts = artifacts.clone();
        }

        if let Some(outdata) = &self.outdata {
            config.outdata = outdata.clone();
        }

        if let Some(api_url) = &self.explorer_api_url {
            config.explorer.api_url = Some(api_url.clone());
        }

        if let Some(mode) = self.confirmations {
            config.confirmations = mode.into();
        }

        if let Some(fee_address) = self.fee_address {
            for family in config
                .families
                .iter_mut()
                .filter(|f| f.family.is_staking() && f.fee_recipient.is_none())
            {
                family.fee_recipient = Some(fee_address);
            }
        }
    }
}

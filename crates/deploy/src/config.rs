//! On-disk rollout configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    DeployError,
    confirm::ConfirmationConfig,
    planner::{DeploymentPlan, FamilyPlan, StageFlags},
    registry::Family,
    sequencer::{AprTier, SubscriptionConfig, SubscriptionPlan},
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "Slashkit.toml";

/// Default number of verification status polls.
pub const DEFAULT_STATUS_POLL_ATTEMPTS: usize = 10;

/// Explorer used for verification and for the confirmation polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Etherscan-compatible API endpoint. Verification is disabled without one.
    pub api_url: Option<Url>,
    /// `chainid` parameter for multichain endpoints.
    pub chain_id: Option<u64>,
    pub status_poll_attempts: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            chain_id: None,
            status_poll_attempts: DEFAULT_STATUS_POLL_ATTEMPTS,
        }
    }
}

/// Everything a run needs besides secrets and the RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Hardhat `artifacts` directory.
    pub artifacts: PathBuf,
    /// Directory receiving the run reports.
    pub outdata: PathBuf,
    pub explorer: ExplorerConfig,
    pub confirmations: ConfirmationConfig,
    pub families: Vec<FamilyPlan>,
    pub subscriptions: Vec<SubscriptionConfig>,
    pub aprs: Vec<AprTier>,
}

impl Default for RolloutConfig {
    /// Fresh rollout of both staking families with the standard subscription
    /// plans and APR tiers.
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from("artifacts"),
            outdata: PathBuf::from("deployments"),
            explorer: ExplorerConfig::default(),
            confirmations: ConfirmationConfig::default(),
            families: vec![
                FamilyPlan::new(Family::SingleNftStaking).with_flags(StageFlags::fresh()),
                FamilyPlan::new(Family::MultiNftStaking).with_flags(StageFlags::fresh()),
            ],
            subscriptions: vec![
                SubscriptionConfig::new("Basic", 2_592_000, "1"),
                SubscriptionConfig::new("Standard", 7_776_000, "3"),
                SubscriptionConfig::new("Premium", 15_552_000, "5"),
            ],
            aprs: vec![80.into(), 120.into(), 180.into()],
        }
    }
}

impl RolloutConfig {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize rollout config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// A directory resolves to [`CONFIG_FILENAME`] inside it.
    pub fn resolve_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        }
    }

    /// Load the configuration from a TOML file, or from [`CONFIG_FILENAME`]
    /// inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = Self::resolve_path(path);

        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Build the immutable plan for one run.
    pub fn plan(&self) -> Result<DeploymentPlan, DeployError> {
        let subscriptions = self
            .subscriptions
            .iter()
            .map(SubscriptionPlan::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let plan = DeploymentPlan {
            families: self.families.clone(),
            confirmations: self.confirmations,
            subscriptions,
            aprs: self.aprs.clone(),
        };
        plan.validate()?;

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, U256};
    use tempdir::TempDir;

    use super::*;
    use crate::confirm::WaitPolicy;

    #[test]
    fn test_default_plan_data() {
        let config = RolloutConfig {
            families: vec![],
            ..Default::default()
        };
        let plan = config.plan().unwrap();

        let names: Vec<_> = plan.subscriptions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Basic", "Standard", "Premium"]);
        assert_eq!(
            plan.subscriptions[2].price_wei,
            U256::from(5u64) * U256::from(10u64).pow(U256::from(18))
        );
        assert_eq!(
            plan.aprs.iter().map(|a| a.rate).collect::<Vec<_>>(),
            vec![80, 120, 180]
        );
    }

    #[test]
    fn test_default_staking_families_need_fee_recipient() {
        let err = RolloutConfig::default().plan().unwrap_err();
        assert!(matches!(err, DeployError::InvalidPlan(msg) if msg.contains("fee_recipient")));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new("slashkit-config").unwrap();
        let mut config = RolloutConfig::default();
        config.confirmations.template = WaitPolicy::Fixed { seconds: 30 };
        config.families[0].fee_recipient = Some(Address::repeat_byte(0xfe));

        config.save_to_file(&dir.path().join(CONFIG_FILENAME)).unwrap();

        // A directory resolves to the default file name inside it.
        let loaded = RolloutConfig::load_from_file(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new("slashkit-config").unwrap();
        assert!(RolloutConfig::load_from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: RolloutConfig = toml::from_str(
            r#"
            aprs = [100]

            [[families]]
            family = "multi-nft-staking"
            factory_address = "0x20f8ba84d67bf436e9cbc4920f781009566d76f2"
            flags = { initialize = true }
            "#,
        )
        .unwrap();

        assert_eq!(config.subscriptions.len(), 3);
        assert_eq!(config.artifacts, PathBuf::from("artifacts"));

        let plan = config.plan().unwrap();
        assert_eq!(plan.families.len(), 1);
        assert!(plan.families[0].flags.initialize);
        assert_eq!(plan.aprs, vec![AprTier::from(100)]);
    }

    #[test]
    fn test_invalid_subscription_rejected() {
        let config = RolloutConfig {
            families: vec![],
            subscriptions: vec![SubscriptionConfig::new("Free", 0, "0")],
            ..Default::default()
        };
        assert!(matches!(config.plan(), Err(DeployError::InvalidPlan(_))));
    }
}
